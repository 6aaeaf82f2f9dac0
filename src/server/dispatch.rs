use crate::connection::ConnectionFactory;
use crate::core::{Caller, Result, TransactionId, TxnError};
use crate::transaction::SessionManager;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Methods exported by the transaction service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Begin,
    Execute,
    Rollback,
    Commit,
    Close,
    CloseConnection,
    Kill,
    List,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::Begin,
        Method::Execute,
        Method::Rollback,
        Method::Commit,
        Method::Close,
        Method::CloseConnection,
        Method::Kill,
        Method::List,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Method::Begin => "begin",
            Method::Execute => "execute",
            Method::Rollback => "rollback",
            Method::Commit => "commit",
            Method::Close => "close",
            Method::CloseConnection => "close_connection",
            Method::Kill => "kill",
            Method::List => "list",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Positional parameters of one call
struct Params {
    method: Method,
    values: Vec<Value>,
}

impl Params {
    fn get(&self, index: usize, what: &str) -> Result<&Value> {
        self.values.get(index).ok_or_else(|| {
            TxnError::InvalidParams(format!(
                "{}: missing parameter {} ({})",
                self.method, index, what
            ))
        })
    }

    fn string(&self, index: usize, what: &str) -> Result<String> {
        match self.get(index, what)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(self.invalid(what, other)),
        }
    }

    /// Identities arrive either as names or as numeric user ids
    fn identity(&self, index: usize) -> Result<String> {
        match self.get(index, "identity")? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
            other => Err(self.invalid("identity", other)),
        }
    }

    fn caller(&self) -> Result<Caller> {
        Ok(Caller {
            store: self.string(0, "store")?,
            identity: self.identity(1)?,
            credential: self.string(2, "credential")?,
        })
    }

    fn transaction_id(&self, index: usize) -> Result<TransactionId> {
        let value = self.get(index, "transaction id")?;
        value
            .as_u64()
            .map(TransactionId)
            .ok_or_else(|| self.invalid("transaction id", value))
    }

    /// Absent, null, false and 0 all mean "no id requested"
    fn optional_transaction_id(&self, index: usize) -> Result<Option<TransactionId>> {
        match self.values.get(index) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
            Some(value) if value.as_u64() == Some(0) => Ok(None),
            Some(_) => self.transaction_id(index).map(Some),
        }
    }

    fn optional_identity(&self, index: usize) -> Result<Option<String>> {
        match self.values.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.identity(index).map(Some),
        }
    }

    fn rest(&mut self, from: usize) -> Vec<Value> {
        if self.values.len() > from {
            self.values.split_off(from)
        } else {
            Vec::new()
        }
    }

    fn invalid(&self, what: &str, got: &Value) -> TxnError {
        TxnError::InvalidParams(format!("{}: invalid {}: {}", self.method, what, got))
    }
}

/// Method table bound to one `SessionManager`
///
/// The table is built and checked once in `new`; calls only look names up.
pub struct Dispatcher<F: ConnectionFactory> {
    manager: Arc<SessionManager<F>>,
    methods: HashMap<&'static str, Method>,
}

impl<F: ConnectionFactory> Dispatcher<F> {
    pub fn new(manager: Arc<SessionManager<F>>) -> Result<Self> {
        let mut methods = HashMap::with_capacity(Method::ALL.len());
        for method in Method::ALL {
            if methods.insert(method.name(), method).is_some() {
                return Err(TxnError::ConfigError(format!(
                    "Method '{}' exported twice",
                    method
                )));
            }
        }

        Ok(Self { manager, methods })
    }

    /// Exported method names, sorted
    pub fn methods(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.methods.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let method = *self
            .methods
            .get(method)
            .ok_or_else(|| TxnError::UnknownMethod(method.to_string()))?;
        let mut params = Params {
            method,
            values: params,
        };

        match method {
            Method::Begin => {
                let caller = params.caller()?;
                let requested = params.optional_transaction_id(3)?;
                let tid = self.manager.begin_with_id(&caller, requested).await?;
                Ok(json!(tid))
            }
            Method::Execute => {
                let caller = params.caller()?;
                let tid = params.transaction_id(3)?;
                let collection = params.string(4, "collection")?;
                let operation = params.string(5, "operation")?;
                let args = params.rest(6);
                self.manager
                    .execute(&caller, tid, &collection, &operation, args)
                    .await
            }
            Method::Rollback => {
                let caller = params.caller()?;
                let tid = params.transaction_id(3)?;
                self.manager.rollback(&caller, tid).await?;
                Ok(Value::Null)
            }
            Method::Commit => {
                let caller = params.caller()?;
                let tid = params.transaction_id(3)?;
                self.manager.commit(&caller, tid).await?;
                Ok(Value::Null)
            }
            Method::Close | Method::CloseConnection => {
                let caller = params.caller()?;
                let tid = params.transaction_id(3)?;
                self.manager.close(&caller, tid).await?;
                Ok(Value::Null)
            }
            Method::Kill => {
                let caller = params.caller()?;
                let tid = params.transaction_id(3)?;
                let owner = params.optional_identity(4)?;
                self.manager.kill(&caller, tid, owner.as_deref()).await?;
                Ok(Value::Null)
            }
            Method::List => {
                self.manager.list().await;
                Ok(Value::Null)
            }
        }
    }
}
