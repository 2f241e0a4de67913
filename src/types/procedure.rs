//! Stored-procedure signatures and bound parameter collections

use super::{ColumnType, Value};

/// Direction of a bound parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

/// One declared procedure parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub col_type: ColumnType,
    pub required: bool,
}

/// Procedure signature; immutable once registered
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcedureDef {
    pub required_in: Vec<ParamDef>,
    pub optional_in: Vec<ParamDef>,
    pub out_params: Vec<ParamDef>,
    pub return_param: Option<ParamDef>,
}

impl ProcedureDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required_input(mut self, name: &str, col_type: ColumnType) -> Self {
        self.required_in.push(ParamDef {
            name: name.to_string(),
            col_type,
            required: true,
        });
        self
    }

    pub fn optional_input(mut self, name: &str, col_type: ColumnType) -> Self {
        self.optional_in.push(ParamDef {
            name: name.to_string(),
            col_type,
            required: false,
        });
        self
    }

    pub fn output(mut self, name: &str, col_type: ColumnType) -> Self {
        self.out_params.push(ParamDef {
            name: name.to_string(),
            col_type,
            required: false,
        });
        self
    }

    pub fn returns(mut self, name: &str, col_type: ColumnType) -> Self {
        self.return_param = Some(ParamDef {
            name: name.to_string(),
            col_type,
            required: false,
        });
        self
    }

    /// Positional order used by `CALL p(a, b, ...)`
    pub fn positional(&self) -> impl Iterator<Item = &ParamDef> {
        self.required_in
            .iter()
            .chain(self.optional_in.iter())
            .chain(self.out_params.iter())
    }
}

/// Strip a parameter marker and fold case: `@P_Name` -> `p_name`
pub fn normalize_param_name(name: &str) -> String {
    name.trim()
        .trim_start_matches(|c| c == '@' || c == ':' || c == '?')
        .to_lowercase()
}

/// A bound parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    pub direction: ParameterDirection,
}

/// Bound parameters keyed by normalized name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    items: Vec<Parameter>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an input parameter (replaces an existing binding of the same name)
    pub fn add(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.bind(name, value.into(), ParameterDirection::Input);
        self
    }

    /// Declare an output parameter with no value yet
    pub fn add_output(mut self, name: &str) -> Self {
        self.bind(name, Value::Null, ParameterDirection::Output);
        self
    }

    pub fn add_with_direction(
        mut self,
        name: &str,
        value: impl Into<Value>,
        direction: ParameterDirection,
    ) -> Self {
        self.bind(name, value.into(), direction);
        self
    }

    pub fn bind(&mut self, name: &str, value: Value, direction: ParameterDirection) {
        let key = normalize_param_name(name);
        match self
            .items
            .iter_mut()
            .find(|p| normalize_param_name(&p.name) == key)
        {
            Some(existing) => {
                existing.value = value;
                existing.direction = direction;
            }
            None => self.items.push(Parameter {
                name: name.to_string(),
                value,
                direction,
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        let key = normalize_param_name(name);
        self.items
            .iter()
            .find(|p| normalize_param_name(&p.name) == key)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|p| &p.value)
    }

    pub fn set_value(&mut self, name: &str, value: Value) -> bool {
        let key = normalize_param_name(name);
        match self
            .items
            .iter_mut()
            .find(|p| normalize_param_name(&p.name) == key)
        {
            Some(p) => {
                p.value = value;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_lookup() {
        let params = Parameters::new().add("@P_Name", "Alice");
        assert_eq!(params.value("p_name"), Some(&Value::from("Alice")));
        assert_eq!(params.value(":p_name"), Some(&Value::from("Alice")));
        assert!(params.get("p_email").is_none());
    }

    #[test]
    fn test_rebinding_replaces() {
        let params = Parameters::new().add("@id", 1i64).add("id", 2i64);
        assert_eq!(params.len(), 1);
        assert_eq!(params.value("@id"), Some(&Value::Integer(2)));
    }
}
