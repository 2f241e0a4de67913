//! Connection - statement dispatch and per-session state
//!
//! A `Connection` owns the transaction and the metrics of one session. Any
//! number of connections can share a `Database`; they serialize on its
//! catalog lock.

use crate::database::{
    Database, IsolationLevel, Metrics, Transaction, TransactionState,
};
use crate::database::transaction::DeltaOperation;
use crate::dialect::Feature;
use crate::error::{Result, SqlError};
use crate::sql::ast::{Query, Statement};
use crate::sql::executor::{QueryResult, RowSet};
use crate::sql::plan::{self, PlanMetrics};
use crate::sql::{parse, parse_multi};
use crate::types::Parameters;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub struct Connection {
    db: Arc<Database>,
    transaction: Option<Transaction>,
    metrics: Arc<Metrics>,
    /// Plan of the last SELECT/UNION; cleared by the next statement
    last_plan: Option<String>,
}

impl Connection {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        let metrics = Arc::new(Metrics::with_parent(Arc::clone(db.metrics())));
        Self {
            db,
            transaction: None,
            metrics,
            last_plan: None,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Counters for statements run on this connection
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn last_execution_plan(&self) -> Option<&str> {
        self.last_plan.as_deref()
    }

    // ==================== SQL ====================

    /// Parse and execute one statement
    pub fn execute(&mut self, sql: &str, params: &Parameters) -> Result<QueryResult> {
        self.last_plan = None;
        let statement = parse(sql, self.db.dialect())?;
        self.execute_statement(statement, params)
    }

    /// Run a SELECT/UNION and return its rows
    pub fn query(&mut self, sql: &str, params: &Parameters) -> Result<RowSet> {
        match self.execute(sql, params)? {
            QueryResult::Select(rows) => Ok(rows),
            _ => Err(SqlError::InvalidArgument(format!(
                "statement did not return rows: {}",
                sql
            ))),
        }
    }

    /// Execute a `;`-separated batch, stopping at the first error
    pub fn execute_batch(&mut self, sql: &str, params: &Parameters) -> Result<Vec<QueryResult>> {
        self.last_plan = None;
        let statements = parse_multi(sql, self.db.dialect())?;
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            results.push(self.execute_statement(statement, params)?);
        }
        Ok(results)
    }

    /// Execute an already parsed statement
    pub fn execute_statement(
        &mut self,
        statement: Statement,
        params: &Parameters,
    ) -> Result<QueryResult> {
        self.last_plan = None;
        let started = Instant::now();
        debug!(
            statement = statement.kind_name(),
            in_transaction = self.in_transaction(),
            "dispatching statement"
        );
        let result = self.dispatch(statement, params);
        self.metrics.record_elapsed(started.elapsed());
        if let Err(e) = &result {
            warn!(code = e.code(), error = %e, "statement failed");
        }
        result
    }

    fn dispatch(&mut self, statement: Statement, params: &Parameters) -> Result<QueryResult> {
        let db = Arc::clone(&self.db);
        match statement {
            Statement::Select(stmt) => self
                .run_query(&Query::Select(Box::new(stmt)), params)
                .map(QueryResult::Select),
            Statement::Union(stmt) => self
                .run_query(&Query::Union(Box::new(stmt)), params)
                .map(QueryResult::Select),

            // DML
            Statement::Insert(stmt) => {
                let applied = db.execute_insert(&stmt, params, &self.metrics)?;
                Ok(self.track(applied))
            }
            Statement::Update(stmt) => {
                let applied = db.execute_update(&stmt, params, &self.metrics)?;
                Ok(self.track(applied))
            }
            Statement::Delete(stmt) => {
                let applied = db.execute_delete(&stmt, params, &self.metrics)?;
                Ok(self.track(applied))
            }
            Statement::Merge(stmt) => {
                let applied = db.execute_merge(&stmt, params, &self.metrics)?;
                Ok(self.track(applied))
            }

            // DDL (never undone)
            Statement::CreateTable(stmt) => definition(db.execute_create_table(&stmt)),
            Statement::CreateTableAs(stmt) => {
                definition(db.execute_create_table_as(&stmt, params, &self.metrics))
            }
            Statement::CreateIndex(stmt) => definition(db.execute_create_index(&stmt)),
            Statement::CreateView(stmt) => {
                definition(db.execute_create_view(&stmt, params, &self.metrics))
            }
            Statement::DropTable { name, if_exists } => {
                definition(db.execute_drop_table(&name, if_exists))
            }
            Statement::DropView { name, if_exists } => {
                definition(db.execute_drop_view(&name, if_exists))
            }

            Statement::Call(stmt) => {
                let (affected_rows, outputs) = db.execute_call(&stmt, params, &self.metrics)?;
                Ok(QueryResult::Call {
                    affected_rows,
                    outputs,
                })
            }

            // Transaction control
            Statement::Begin => {
                self.begin_transaction()?;
                definition(Ok("Transaction started".to_string()))
            }
            Statement::Commit => {
                self.commit()?;
                definition(Ok("Transaction committed".to_string()))
            }
            Statement::Rollback { savepoint: None } => {
                let undone = self.rollback()?;
                definition(Ok(format!("Transaction rolled back ({} change(s) undone)", undone)))
            }
            Statement::Rollback {
                savepoint: Some(name),
            } => {
                let undone = self.rollback_to_savepoint(&name)?;
                definition(Ok(format!(
                    "Rolled back to savepoint '{}' ({} change(s) undone)",
                    name, undone
                )))
            }
            Statement::Savepoint(name) => {
                self.savepoint(&name)?;
                definition(Ok(format!("Savepoint '{}' created", name)))
            }
            Statement::ReleaseSavepoint(name) => {
                self.release_savepoint(&name)?;
                definition(Ok(format!("Savepoint '{}' released", name)))
            }
        }
    }

    /// Execute a query under the shared lock and keep its plan
    fn run_query(&mut self, query: &Query, params: &Parameters) -> Result<RowSet> {
        let started = Instant::now();
        let (rows, stats) = {
            let catalog = self.db.read();
            let executor = self.db.query_executor(&catalog, params, &self.metrics);
            let rows = executor.execute_query(query)?;
            let stats = executor.take_stats();
            (rows, stats)
        };
        self.metrics.record_selects(rows.len() as u64);

        let plan_metrics = PlanMetrics::new(&stats, rows.len(), started.elapsed());
        self.last_plan = Some(plan::render(query, &stats, &plan_metrics));
        Ok(rows)
    }

    /// Keep a statement's deltas for rollback while a transaction is open
    fn track(&mut self, (affected_rows, deltas): (usize, Vec<DeltaOperation>)) -> QueryResult {
        if let Some(txn) = self.transaction.as_mut() {
            txn.record(deltas);
        }
        QueryResult::Modification { affected_rows }
    }

    // ==================== Procedures ====================

    /// Validate `params` against procedure `name`; outputs are written back
    pub fn call_procedure(&mut self, name: &str, params: &mut Parameters) -> Result<usize> {
        self.last_plan = None;
        let started = Instant::now();
        let result = self.db.execute_procedure(name, params);
        self.metrics.record_elapsed(started.elapsed());
        result
    }

    // ==================== Transactions ====================

    pub fn begin_transaction(&mut self) -> Result<()> {
        let isolation = self.db.config().default_isolation;
        self.begin_transaction_with_isolation(isolation)
    }

    pub fn begin_transaction_with_isolation(&mut self, isolation: IsolationLevel) -> Result<()> {
        if self.in_transaction() {
            return Err(SqlError::Transaction(
                "A transaction is already active on this connection".into(),
            ));
        }
        self.transaction = Some(Transaction::new(isolation));
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        let mut txn = self.take_active()?;
        txn.commit()
    }

    /// Undo every change since BEGIN; returns the number of row changes undone
    ///
    /// When another connection has since claimed a key or referenced a row
    /// this transaction would restore or remove, the rollback fails with
    /// that constraint's error and the transaction stays open.
    pub fn rollback(&mut self) -> Result<usize> {
        let db = Arc::clone(&self.db);
        let txn = self.active_mut()?;
        let undone = txn.rollback(&mut db.write())?;
        self.transaction = None;
        Ok(undone)
    }

    pub fn savepoint(&mut self, name: &str) -> Result<()> {
        self.active_mut()?.savepoint(name)
    }

    /// Alias of [`Connection::savepoint`]
    pub fn save(&mut self, name: &str) -> Result<()> {
        self.savepoint(name)
    }

    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<usize> {
        let db = Arc::clone(&self.db);
        let txn = self.active_mut()?;
        let mut catalog = db.write();
        txn.rollback_to(name, &mut catalog)
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.db.dialect().require(Feature::ReleaseSavepoint)?;
        self.active_mut()?.release(name)
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.as_ref().map_or(false, Transaction::is_active)
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction
            .as_ref()
            .map_or(TransactionState::NoTransaction, Transaction::state)
    }

    pub fn current_isolation_level(&self) -> Option<IsolationLevel> {
        self.transaction.as_ref().map(Transaction::isolation)
    }

    /// Savepoint names of the open transaction, oldest first
    pub fn savepoints(&self) -> Vec<String> {
        self.transaction
            .as_ref()
            .map(Transaction::savepoint_names)
            .unwrap_or_default()
    }

    fn active_mut(&mut self) -> Result<&mut Transaction> {
        match self.transaction.as_mut() {
            Some(txn) if txn.is_active() => Ok(txn),
            _ => Err(no_transaction()),
        }
    }

    fn take_active(&mut self) -> Result<Transaction> {
        if !self.in_transaction() {
            return Err(no_transaction());
        }
        self.transaction.take().ok_or_else(no_transaction)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // an open transaction is rolled back with the connection
        if self.in_transaction() {
            if let Err(e) = self.rollback() {
                warn!(error = %e, "rollback on close failed");
            }
        }
    }
}

fn no_transaction() -> SqlError {
    SqlError::Transaction("No active transaction".into())
}

fn definition(result: Result<String>) -> Result<QueryResult> {
    result.map(|message| QueryResult::Definition { message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{ColumnType, ParameterDirection, ProcedureDef, Value};
    use std::thread;

    fn connect(config: EngineConfig) -> Connection {
        Arc::new(Database::new(config)).connect()
    }

    fn exec(conn: &mut Connection, sql: &str) -> QueryResult {
        conn.execute(sql, &Parameters::new()).unwrap()
    }

    fn users(conn: &mut Connection) {
        exec(
            conn,
            "CREATE TABLE users (id INT PRIMARY KEY AUTO_INCREMENT, name VARCHAR(50) NOT NULL, \
             email VARCHAR(100), UNIQUE KEY ux_email (email))",
        );
    }

    fn names(conn: &mut Connection) -> Vec<String> {
        conn.query("SELECT name FROM users ORDER BY id", &Parameters::new())
            .unwrap()
            .column_values("name")
            .iter()
            .map(|v| v.to_string())
            .collect()
    }

    #[test]
    fn test_duplicate_insert_is_atomic() {
        let mut conn = connect(EngineConfig::mysql());
        users(&mut conn);
        exec(&mut conn, "INSERT INTO users (name, email) VALUES ('Ann', 'x@y')");
        let err = conn
            .execute(
                "INSERT INTO users (name, email) VALUES ('Bob', 'b@y'), ('Cid', 'x@y')",
                &Parameters::new(),
            )
            .unwrap_err();
        assert_eq!(err.code(), 1062);
        assert_eq!(names(&mut conn), vec!["Ann".to_string()]);
        assert_eq!(conn.metrics().inserts(), 1);
    }

    fn stock(conn: &mut Connection) -> Vec<String> {
        let rs = conn
            .query("SELECT sku, qty FROM stock ORDER BY sku", &Parameters::new())
            .unwrap();
        rs.rows.iter().map(|r| format!("{}={}", r[0], r[1])).collect()
    }

    #[test]
    fn test_on_conflict_upserts() {
        let mut conn = connect(EngineConfig::postgres());
        exec(&mut conn, "CREATE TABLE stock (sku VARCHAR(10) PRIMARY KEY, qty INT NOT NULL)");
        exec(&mut conn, "INSERT INTO stock (sku, qty) VALUES ('a', 5), ('b', 1)");

        let r = exec(
            &mut conn,
            "INSERT INTO stock (sku, qty) VALUES ('a', 2), ('c', 7) \
             ON CONFLICT (sku) DO UPDATE SET qty = stock.qty + excluded.qty",
        );
        assert_eq!(r.affected_rows(), 2);
        let r = exec(
            &mut conn,
            "INSERT INTO stock (sku, qty) VALUES ('b', 9) \
             ON CONFLICT (sku) DO UPDATE SET qty = excluded.qty WHERE stock.qty > 5",
        );
        assert_eq!(r.affected_rows(), 0);
        let r = exec(&mut conn, "INSERT INTO stock (sku, qty) VALUES ('b', 9) ON CONFLICT DO NOTHING");
        assert_eq!(r.affected_rows(), 0);
        assert_eq!(stock(&mut conn), vec!["a=7", "b=1", "c=7"]);

        let err = conn
            .execute(
                "INSERT INTO stock (sku, qty) VALUES ('a', 1) ON CONFLICT (qty) DO NOTHING",
                &Parameters::new(),
            )
            .unwrap_err();
        assert_eq!(err.code(), 1210);
    }

    #[test]
    fn test_merge_applies_first_fitting_clause() {
        let mut conn = connect(EngineConfig::postgres());
        exec(&mut conn, "CREATE TABLE stock (sku VARCHAR(10) PRIMARY KEY, qty INT NOT NULL)");
        exec(&mut conn, "CREATE TABLE delivery (sku VARCHAR(10), qty INT)");
        exec(&mut conn, "INSERT INTO stock (sku, qty) VALUES ('a', 5), ('b', 1), ('c', 7)");
        exec(&mut conn, "INSERT INTO delivery (sku, qty) VALUES ('a', 0), ('b', 4), ('d', 3)");

        let merge = "MERGE INTO stock s USING delivery d ON s.sku = d.sku \
                     WHEN MATCHED AND d.qty = 0 THEN DELETE \
                     WHEN MATCHED THEN UPDATE SET qty = s.qty + d.qty \
                     WHEN NOT MATCHED THEN INSERT (sku, qty) VALUES (d.sku, d.qty)";
        let r = exec(&mut conn, merge);
        assert_eq!(r.affected_rows(), 3);
        assert_eq!(stock(&mut conn), vec!["b=5", "c=7", "d=3"]);
        assert_eq!(conn.metrics().deletes(), 1);

        // two source rows for one target row
        exec(&mut conn, "INSERT INTO delivery (sku, qty) VALUES ('b', 1)");
        let err = conn.execute(merge, &Parameters::new()).unwrap_err();
        assert_eq!(err.code(), 1210);
        assert_eq!(stock(&mut conn), vec!["b=5", "c=7", "d=3"]);

        let mut mysql = connect(EngineConfig::mysql());
        let err = mysql.execute(merge, &Parameters::new()).unwrap_err();
        assert_eq!(err.code(), 1235);
    }

    #[test]
    fn test_savepoint_round_trip_through_sql() {
        let mut conn = connect(EngineConfig::mysql());
        users(&mut conn);
        exec(&mut conn, "BEGIN");
        exec(&mut conn, "INSERT INTO users (name) VALUES ('Ann')");
        exec(&mut conn, "SAVEPOINT s1");
        exec(&mut conn, "INSERT INTO users (name) VALUES ('Bob')");
        exec(&mut conn, "UPDATE users SET name = 'Zed' WHERE name = 'Ann'");
        assert_eq!(names(&mut conn), vec!["Zed".to_string(), "Bob".to_string()]);

        exec(&mut conn, "ROLLBACK TO SAVEPOINT s1");
        assert_eq!(names(&mut conn), vec!["Ann".to_string()]);
        assert!(conn.in_transaction());
        assert_eq!(conn.savepoints(), vec!["s1".to_string()]);

        exec(&mut conn, "ROLLBACK");
        assert!(names(&mut conn).is_empty());
        assert_eq!(conn.transaction_state(), TransactionState::NoTransaction);
        assert_eq!(
            conn.execute("COMMIT", &Parameters::new()).unwrap_err().code(),
            1399
        );
    }

    #[test]
    fn test_transaction_state_errors() {
        let mut conn = connect(EngineConfig::sql_server());
        conn.begin_transaction_with_isolation(IsolationLevel::Snapshot)
            .unwrap();
        assert_eq!(conn.current_isolation_level(), Some(IsolationLevel::Snapshot));
        assert!(matches!(
            conn.begin_transaction(),
            Err(SqlError::Transaction(_))
        ));
        conn.savepoint("a").unwrap();
        assert_eq!(conn.release_savepoint("a").unwrap_err().code(), 1235);
        assert_eq!(conn.rollback_to_savepoint("nope").unwrap_err().code(), 1305);
        conn.commit().unwrap();
        assert_eq!(conn.savepoint("b").unwrap_err().code(), 1399);
    }

    #[test]
    fn test_release_savepoint_keeps_changes() {
        let mut conn = connect(EngineConfig::postgres());
        exec(&mut conn, "CREATE TABLE t (id INT)");
        exec(&mut conn, "BEGIN");
        exec(&mut conn, "SAVEPOINT a");
        exec(&mut conn, "INSERT INTO t VALUES (1)");
        exec(&mut conn, "RELEASE SAVEPOINT a");
        assert!(conn.savepoints().is_empty());
        exec(&mut conn, "COMMIT");
        assert_eq!(conn.database().row_count("t").unwrap(), 1);
    }

    #[test]
    fn test_plan_and_metrics_after_select() {
        let mut conn = connect(EngineConfig::mysql());
        users(&mut conn);
        exec(&mut conn, "INSERT INTO users (name, email) VALUES ('Ann', 'a@x'), ('Bob', 'b@x')");
        let rows = conn
            .query("SELECT name FROM users WHERE id > 0 ORDER BY name", &Parameters::new())
            .unwrap();
        assert_eq!(rows.len(), 2);

        let plan = conn.last_execution_plan().unwrap().to_string();
        assert!(plan.starts_with("Execution Plan\n"));
        assert!(plan.contains("- Query Type: SELECT"));
        assert!(plan.contains("- Estimated Cost: 33"));
        assert!(plan.contains("- Access: FULL SCAN users"));
        assert!(plan.contains("- Actual Rows: 2"));

        exec(&mut conn, "DELETE FROM users WHERE name = 'Bob'");
        assert!(conn.last_execution_plan().is_none());

        let m = conn.metrics();
        assert_eq!(m.selects(), 2);
        assert_eq!(m.inserts(), 2);
        assert_eq!(m.deletes(), 1);
        assert_eq!(m.table_hint("USERS"), 2);
        assert_eq!(conn.database().metrics().inserts(), 2);
    }

    #[test]
    fn test_call_binds_arguments() {
        let mut conn = connect(EngineConfig::mysql());
        conn.database()
            .add_procedure(
                "sp_get_total",
                ProcedureDef::new()
                    .required_input("p_id", ColumnType::Integer)
                    .output("o_total", ColumnType::Decimal),
            )
            .unwrap();

        let result = exec(&mut conn, "CALL sp_get_total(7, @o_total)");
        let QueryResult::Call { outputs, .. } = result else {
            panic!("expected a CALL result");
        };
        assert_eq!(outputs.value("p_id"), Some(&Value::Integer(7)));
        assert!(matches!(outputs.value("o_total"), Some(Value::Decimal(d)) if d.is_zero()));

        let err = conn
            .execute("CALL sp_get_total(NULL, @o_total)", &Parameters::new())
            .unwrap_err();
        assert_eq!(err.code(), 1048);
        assert_eq!(
            conn.execute("CALL sp_get_total(1, @a, @b)", &Parameters::new())
                .unwrap_err()
                .code(),
            1318
        );

        // no arguments: the bound collection is matched by name
        let params = Parameters::new()
            .add("@p_id", 1)
            .add_with_direction("@o_total", Value::Null, ParameterDirection::Output);
        assert!(conn.execute("CALL sp_get_total()", &params).is_ok());

        let mut direct = Parameters::new().add("@p_id", 1);
        assert_eq!(
            conn.call_procedure("sp_get_total", &mut direct).unwrap_err().code(),
            1318
        );
    }

    #[test]
    fn test_drop_rolls_back_open_transaction() {
        let db = Arc::new(Database::new(EngineConfig::sqlite()));
        let mut setup = db.connect();
        exec(&mut setup, "CREATE TABLE t (id INT)");
        {
            let mut conn = db.connect();
            exec(&mut conn, "BEGIN");
            exec(&mut conn, "INSERT INTO t VALUES (1)");
        }
        assert_eq!(db.row_count("t").unwrap(), 0);
    }

    #[test]
    fn test_rollback_refuses_to_duplicate_a_key_taken_meanwhile() {
        let db = Arc::new(Database::new(EngineConfig::mysql()));
        let mut a = db.connect();
        let mut b = db.connect();
        exec(&mut a, "CREATE TABLE t (id INT PRIMARY KEY, u INT UNIQUE)");
        exec(&mut a, "INSERT INTO t VALUES (1, 10)");

        exec(&mut a, "BEGIN");
        exec(&mut a, "DELETE FROM t WHERE id = 1");
        exec(&mut b, "INSERT INTO t VALUES (1, 10)");

        let err = a.execute("ROLLBACK", &Parameters::new()).unwrap_err();
        assert_eq!(err.code(), 1062);
        assert!(a.in_transaction());
        assert_eq!(db.row_count("t").unwrap(), 1);

        // once the key is free again the rollback goes through
        exec(&mut b, "DELETE FROM t WHERE id = 1");
        assert_eq!(a.rollback().unwrap(), 1);
        assert!(!a.in_transaction());
        let rows = a.query("SELECT id, u FROM t", &Parameters::new()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.column_values("u"), vec![Value::Integer(10)]);
    }

    #[test]
    fn test_rollback_refuses_to_orphan_child_rows() {
        let db = Arc::new(Database::new(EngineConfig::mysql()));
        let mut a = db.connect();
        let mut b = db.connect();
        exec(&mut a, "CREATE TABLE parent (id INT PRIMARY KEY)");
        exec(
            &mut a,
            "CREATE TABLE child (id INT PRIMARY KEY, parent_id INT, \
             CONSTRAINT fk_child_parent FOREIGN KEY (parent_id) REFERENCES parent (id))",
        );

        exec(&mut a, "BEGIN");
        exec(&mut a, "INSERT INTO parent VALUES (5)");
        exec(&mut b, "INSERT INTO child VALUES (1, 5)");

        let err = a.rollback().unwrap_err();
        assert_eq!(err.code(), 1451);
        assert!(a.in_transaction());
        assert_eq!(db.row_count("parent").unwrap(), 1);

        exec(&mut a, "COMMIT");
        assert_eq!(db.row_count("child").unwrap(), 1);
    }

    #[test]
    fn test_concurrent_identity_is_unique() -> anyhow::Result<()> {
        let db = Arc::new(Database::new(EngineConfig::mysql().thread_safe(true)));
        db.connect()
            .execute(
                "CREATE TABLE log (id INT PRIMARY KEY AUTO_INCREMENT, worker INT)",
                &Parameters::new(),
            )?;

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let db = Arc::clone(&db);
                thread::spawn(move || -> crate::Result<()> {
                    let mut conn = db.connect();
                    let params = Parameters::new().add("@w", worker);
                    for _ in 0..50 {
                        conn.execute("INSERT INTO log (worker) VALUES (@w)", &params)?;
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().map_err(|_| anyhow::anyhow!("worker panicked"))??;
        }

        let mut conn = db.connect();
        let rows = conn.query("SELECT DISTINCT id FROM log", &Parameters::new())?;
        assert_eq!(rows.len(), 200);
        assert_eq!(db.metrics().inserts(), 200);
        Ok(())
    }
}
