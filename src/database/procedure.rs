//! Stored procedure contract validation
//!
//! Procedures have no body: executing one checks the bound parameters
//! against the registered signature and fills unset outputs with a
//! type-appropriate zero value.

use super::core::Database;
use super::metrics::Metrics;
use crate::error::{Result, SqlError};
use crate::sql::ast::{CallStmt, Expr};
use crate::sql::evaluator::{ExprEvaluator, RowScope};
use crate::types::{
    normalize_param_name, ColumnType, ParamDef, ParameterDirection, Parameters, ProcedureDef,
    Value,
};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

impl Database {
    /// Validate `params` against procedure `name` and populate its outputs
    pub fn execute_procedure(&self, name: &str, params: &mut Parameters) -> Result<usize> {
        let def = self.read().procedure(name)?.clone();
        validate(name, &def, params)?;
        populate_out_defaults(&def, params);
        debug!(procedure = name, "procedure executed");
        Ok(0)
    }

    /// `CALL p(...)`. Without arguments the caller's parameters are matched by
    /// name; with arguments they bind positionally to the signature.
    pub(crate) fn execute_call(
        &self,
        stmt: &CallStmt,
        params: &Parameters,
        metrics: &Metrics,
    ) -> Result<(usize, Parameters)> {
        let mut bound = if stmt.args.is_empty() {
            params.clone()
        } else {
            let catalog = self.read();
            let def = catalog.procedure(&stmt.name)?;
            let executor = self.query_executor(&catalog, params, metrics);
            let ev = executor.evaluator();
            let bound = bind_positional(&stmt.name, def, &stmt.args, params, &ev)?;
            bound
        };
        let affected = self.execute_procedure(&stmt.name, &mut bound)?;
        Ok((affected, bound))
    }
}

fn validate(name: &str, def: &ProcedureDef, params: &Parameters) -> Result<()> {
    for input in &def.required_in {
        let key = normalize_param_name(&input.name);
        let param = params
            .get(&key)
            .ok_or_else(|| SqlError::ArgumentCount(name.to_string()))?;
        if matches!(
            param.direction,
            ParameterDirection::Output | ParameterDirection::ReturnValue
        ) {
            return Err(SqlError::InputDirection(key));
        }
        if param.value.is_null() {
            return Err(SqlError::ParameterCannotBeNull(key));
        }
    }

    for output in &def.out_params {
        let key = normalize_param_name(&output.name);
        let param = params
            .get(&key)
            .ok_or_else(|| SqlError::ArgumentCount(name.to_string()))?;
        if !matches!(
            param.direction,
            ParameterDirection::Output | ParameterDirection::InputOutput
        ) {
            return Err(SqlError::ParameterDirection(key));
        }
    }
    Ok(())
}

/// Zero value written into an output that is still null
pub fn output_default(col_type: ColumnType) -> Value {
    match col_type {
        ColumnType::Integer => Value::Integer(0),
        ColumnType::Decimal => Value::Decimal(Decimal::ZERO),
        ColumnType::Float => Value::Float(0.0),
        ColumnType::Boolean => Value::Bool(false),
        ColumnType::Guid => Value::Guid(Uuid::nil()),
        ColumnType::DateTime => Value::DateTime(NaiveDateTime::MIN),
        ColumnType::Text | ColumnType::Json => Value::Text(String::new()),
    }
}

fn populate_out_defaults(def: &ProcedureDef, params: &mut Parameters) {
    let outputs = def.out_params.iter().chain(def.return_param.iter());
    for out in outputs {
        if matches!(params.value(&out.name), Some(v) if v.is_null()) {
            params.set_value(&out.name, output_default(out.col_type));
        }
    }
}

/// Map CALL arguments onto the signature order: required inputs, optional
/// inputs, then outputs
fn bind_positional(
    name: &str,
    def: &ProcedureDef,
    args: &[Expr],
    caller: &Parameters,
    ev: &ExprEvaluator<'_>,
) -> Result<Parameters> {
    let signature: Vec<&ParamDef> = def.positional().collect();
    if args.len() > signature.len() || args.len() < def.required_in.len() {
        return Err(SqlError::ArgumentCount(name.to_string()));
    }
    let first_output = def.required_in.len() + def.optional_in.len();

    let mut bound = Parameters::new();
    for (i, (arg, param)) in args.iter().zip(signature).enumerate() {
        if i >= first_output {
            // an output argument is a placeholder; carry over any caller value
            let value = match arg {
                Expr::Parameter(p) => caller.value(p).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            };
            bound.bind(&param.name, value, ParameterDirection::Output);
        } else {
            let value = ev.eval(arg, &RowScope::empty())?;
            bound.bind(&param.name, value, ParameterDirection::Input);
        }
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn db() -> Database {
        let db = Database::new(EngineConfig::mysql());
        db.add_procedure(
            "sp_add_user",
            ProcedureDef::new()
                .required_input("p_name", ColumnType::Text)
                .optional_input("p_email", ColumnType::Text)
                .output("o_id", ColumnType::Integer)
                .output("o_note", ColumnType::Text)
                .returns("ret", ColumnType::Integer),
        )
        .unwrap();
        db
    }

    #[test]
    fn test_outputs_receive_defaults() {
        let db = db();
        let mut params = Parameters::new()
            .add("@p_name", "Ann")
            .add_output("@o_id")
            .add_with_direction("@o_note", "kept", ParameterDirection::InputOutput);
        db.execute_procedure("SP_ADD_USER", &mut params).unwrap();
        assert_eq!(params.value("o_id"), Some(&Value::Integer(0)));
        assert_eq!(params.value("o_note"), Some(&Value::from("kept")));
    }

    #[test]
    fn test_argument_errors() {
        let db = db();
        let mut missing = Parameters::new().add_output("@o_id").add_output("@o_note");
        let err = db.execute_procedure("sp_add_user", &mut missing).unwrap_err();
        assert_eq!(err.code(), 1318);

        let mut null_input = Parameters::new()
            .add("@p_name", Value::Null)
            .add_output("@o_id")
            .add_output("@o_note");
        let err = db.execute_procedure("sp_add_user", &mut null_input).unwrap_err();
        assert_eq!(err.code(), 1048);
        assert_eq!(err.to_string(), "Parameter 'p_name' cannot be null");

        let mut no_output = Parameters::new().add("@p_name", "Ann").add_output("@o_id");
        assert_eq!(
            db.execute_procedure("sp_add_user", &mut no_output).unwrap_err().code(),
            1318
        );

        let mut wrong_direction = Parameters::new()
            .add("@p_name", "Ann")
            .add_output("@o_id")
            .add("@o_note", "x");
        assert_eq!(
            db.execute_procedure("sp_add_user", &mut wrong_direction)
                .unwrap_err()
                .code(),
            1414
        );

        let mut any = Parameters::new();
        let err = db.execute_procedure("sp_missing", &mut any).unwrap_err();
        assert_eq!(err.to_string(), "PROCEDURE sp_missing does not exist");
    }

    #[test]
    fn test_required_inputs() {
        let db = Database::new(EngineConfig::postgres());
        db.add_procedure(
            "sp_add_user",
            ProcedureDef::new()
                .required_input("p_name", ColumnType::Text)
                .required_input("p_email", ColumnType::Text),
        )
        .unwrap();

        let mut only_name = Parameters::new().add("@p_name", "Ann");
        let err = db.execute_procedure("sp_add_user", &mut only_name).unwrap_err();
        assert!(matches!(err, SqlError::ArgumentCount(_)));
        assert_eq!(err.code(), 1318);

        let mut null_email = Parameters::new()
            .add("@p_name", "Ann")
            .add("@p_email", Value::Null);
        assert_eq!(
            db.execute_procedure("sp_add_user", &mut null_email)
                .unwrap_err()
                .code(),
            1048
        );

        let mut as_output = Parameters::new().add("@p_name", "Ann").add_output("@p_email");
        assert!(matches!(
            db.execute_procedure("sp_add_user", &mut as_output),
            Err(SqlError::InputDirection(_))
        ));

        let mut ok = Parameters::new()
            .add("@p_name", "Ann")
            .add("@p_email", "a@x");
        assert_eq!(db.execute_procedure("sp_add_user", &mut ok).unwrap(), 0);
    }

    #[test]
    fn test_output_defaults_per_type() {
        assert_eq!(output_default(ColumnType::Boolean), Value::Bool(false));
        assert_eq!(output_default(ColumnType::Guid), Value::Guid(Uuid::nil()));
        assert_eq!(output_default(ColumnType::Text), Value::from(""));
        assert_eq!(
            output_default(ColumnType::DateTime),
            Value::DateTime(NaiveDateTime::MIN)
        );
    }
}
