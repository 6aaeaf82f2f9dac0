use super::Executor;
use crate::core::{Result, TxnError};
use crate::storage::{MemoryConnection, Record};
use async_trait::async_trait;
use serde_json::{Value, json};

/// Operations understood by `MemoryExecutor`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `read(ids, [fields])` -> list of records with `id`
    Read,
    /// `write(ids, values)` -> true
    Write,
    /// `create(values)` -> new id
    Create,
    /// `unlink(ids)` -> true
    Unlink,
    /// `search([[field, op, value], ...])` -> ids, `op` is `=` or `!=`
    Search,
}

impl Operation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "read" => Some(Operation::Read),
            "write" => Some(Operation::Write),
            "create" => Some(Operation::Create),
            "unlink" => Some(Operation::Unlink),
            "search" => Some(Operation::Search),
            _ => None,
        }
    }
}

/// Collection/record executor over `MemoryConnection`
#[derive(Debug, Default, Clone)]
pub struct MemoryExecutor;

impl MemoryExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn read(&self, conn: &MemoryConnection, collection: &str, args: &[Value]) -> Result<Value> {
        let ids = ids_arg(args.first())?;
        let fields = fields_arg(args.get(1))?;

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let record = require_record(conn, collection, id).await?;
            let mut row = Record::new();
            row.insert("id".to_string(), json!(id));
            for (field, value) in record {
                if fields.as_ref().is_none_or(|wanted| wanted.contains(&field)) {
                    row.insert(field, value);
                }
            }
            rows.push(Value::Object(row));
        }
        Ok(Value::Array(rows))
    }

    async fn write(&self, conn: &mut MemoryConnection, collection: &str, args: &[Value]) -> Result<Value> {
        let ids = ids_arg(args.first())?;
        let values = object_arg(args.get(1), "values")?;

        for id in ids {
            let mut record = require_record(conn, collection, id).await?;
            for (field, value) in &values {
                record.insert(field.clone(), value.clone());
            }
            conn.put(collection, id, record).await?;
        }
        Ok(Value::Bool(true))
    }

    async fn create(&self, conn: &mut MemoryConnection, collection: &str, args: &[Value]) -> Result<Value> {
        let mut values = object_arg(args.first(), "values")?;
        values.remove("id");
        let id = conn.insert(collection, values).await?;
        Ok(json!(id))
    }

    async fn unlink(&self, conn: &mut MemoryConnection, collection: &str, args: &[Value]) -> Result<Value> {
        let ids = ids_arg(args.first())?;
        for id in &ids {
            require_record(conn, collection, *id).await?;
        }
        for id in ids {
            conn.delete(collection, id).await?;
        }
        Ok(Value::Bool(true))
    }

    async fn search(&self, conn: &MemoryConnection, collection: &str, args: &[Value]) -> Result<Value> {
        let domain = domain_arg(args.first())?;

        let mut matched = Vec::new();
        for id in conn.ids(collection).await? {
            let Some(record) = conn.get(collection, id).await? else {
                continue;
            };
            if domain.iter().all(|term| term.matches(id, &record)) {
                matched.push(json!(id));
            }
        }
        Ok(Value::Array(matched))
    }
}

#[async_trait]
impl Executor<MemoryConnection> for MemoryExecutor {
    async fn execute(
        &self,
        connection: &mut MemoryConnection,
        _identity: &str,
        collection: &str,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let op = Operation::parse(operation).ok_or_else(|| {
            TxnError::CollaboratorFailure(format!(
                "Method '{}' does not exist on '{}'",
                operation, collection
            ))
        })?;

        match op {
            Operation::Read => self.read(connection, collection, &args).await,
            Operation::Write => self.write(connection, collection, &args).await,
            Operation::Create => self.create(connection, collection, &args).await,
            Operation::Unlink => self.unlink(connection, collection, &args).await,
            Operation::Search => self.search(connection, collection, &args).await,
        }
    }
}

async fn require_record(conn: &MemoryConnection, collection: &str, id: u64) -> Result<Record> {
    conn.get(collection, id).await?.ok_or_else(|| {
        TxnError::CollaboratorFailure(format!(
            "Record {} does not exist in '{}'",
            id, collection
        ))
    })
}

fn ids_arg(value: Option<&Value>) -> Result<Vec<u64>> {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|id| vec![id])
            .ok_or_else(|| TxnError::CollaboratorFailure(format!("Invalid id: {}", n))),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .ok_or_else(|| TxnError::CollaboratorFailure(format!("Invalid id: {}", item)))
            })
            .collect(),
        _ => Err(TxnError::CollaboratorFailure(
            "Expected an id or a list of ids".into(),
        )),
    }
}

fn fields_arg(value: Option<&Value>) -> Result<Option<Vec<String>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    TxnError::CollaboratorFailure(format!("Invalid field name: {}", item))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(other) => Err(TxnError::CollaboratorFailure(format!(
            "Expected a list of field names, got {}",
            other
        ))),
    }
}

fn object_arg(value: Option<&Value>, name: &str) -> Result<Record> {
    match value {
        Some(Value::Object(map)) => Ok(map.clone()),
        _ => Err(TxnError::CollaboratorFailure(format!(
            "Expected '{}' to be an object",
            name
        ))),
    }
}

#[derive(Debug)]
struct Term {
    field: String,
    negate: bool,
    value: Value,
}

impl Term {
    fn matches(&self, id: u64, record: &Record) -> bool {
        let actual = if self.field == "id" {
            Some(json!(id))
        } else {
            record.get(&self.field).cloned()
        };
        let equal = actual.as_ref() == Some(&self.value);
        equal != self.negate
    }
}

fn domain_arg(value: Option<&Value>) -> Result<Vec<Term>> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(TxnError::CollaboratorFailure(format!(
                "Expected a search domain, got {}",
                other
            )));
        }
    };

    items
        .iter()
        .map(|item| match item.as_array().map(Vec::as_slice) {
            Some([Value::String(field), Value::String(op), value]) => {
                let negate = match op.as_str() {
                    "=" => false,
                    "!=" => true,
                    _ => {
                        return Err(TxnError::CollaboratorFailure(format!(
                            "Unsupported operator '{}'",
                            op
                        )));
                    }
                };
                Ok(Term {
                    field: field.clone(),
                    negate,
                    value: value.clone(),
                })
            }
            _ => Err(TxnError::CollaboratorFailure(format!(
                "Invalid domain term: {}",
                item
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionFactory, StoreConnection};
    use crate::storage::MemoryStore;

    async fn setup() -> (MemoryStore, MemoryConnection) {
        let store = MemoryStore::new();
        store.create_store("demo").await;
        store
            .insert("demo", "res.partner", json!({"name": "Alice", "city": "Girona"}))
            .await
            .unwrap();
        store
            .insert("demo", "res.partner", json!({"name": "Bob", "city": "Vic"}))
            .await
            .unwrap();
        let conn = store.open("demo").await.unwrap();
        (store, conn)
    }

    async fn run(conn: &mut MemoryConnection, op: &str, args: Vec<Value>) -> Result<Value> {
        MemoryExecutor::new()
            .execute(conn, "alice", "res.partner", op, args)
            .await
    }

    #[tokio::test]
    async fn test_read_selected_fields() {
        let (_store, mut conn) = setup().await;
        let rows = run(&mut conn, "read", vec![json!([1]), json!(["name"])])
            .await
            .unwrap();
        assert_eq!(rows, json!([{"id": 1, "name": "Alice"}]));
    }

    #[tokio::test]
    async fn test_write_then_read_in_same_transaction() {
        let (_store, mut conn) = setup().await;
        run(&mut conn, "write", vec![json!([1]), json!({"name": "Alice2"})])
            .await
            .unwrap();

        let rows = run(&mut conn, "read", vec![json!(1)]).await.unwrap();
        assert_eq!(rows[0]["name"], json!("Alice2"));
        assert_eq!(rows[0]["city"], json!("Girona"));
    }

    #[tokio::test]
    async fn test_create_and_unlink() {
        let (_store, mut conn) = setup().await;
        let id = run(&mut conn, "create", vec![json!({"name": "Carol"})])
            .await
            .unwrap();
        assert_eq!(id, json!(3));

        run(&mut conn, "unlink", vec![json!([1, 3])]).await.unwrap();
        let ids = run(&mut conn, "search", vec![json!([])]).await.unwrap();
        assert_eq!(ids, json!([2]));

        conn.rollback().await.unwrap();
        let ids = run(&mut conn, "search", vec![]).await.unwrap();
        assert_eq!(ids, json!([1, 2]));
    }

    #[tokio::test]
    async fn test_search_domain() {
        let (_store, mut conn) = setup().await;
        let ids = run(&mut conn, "search", vec![json!([["city", "=", "Vic"]])])
            .await
            .unwrap();
        assert_eq!(ids, json!([2]));

        let ids = run(&mut conn, "search", vec![json!([["name", "!=", "Bob"]])])
            .await
            .unwrap();
        assert_eq!(ids, json!([1]));
    }

    #[tokio::test]
    async fn test_failures_are_collaborator_errors() {
        let (_store, mut conn) = setup().await;

        let missing = run(&mut conn, "read", vec![json!([99])]).await;
        assert!(matches!(missing, Err(TxnError::CollaboratorFailure(_))));

        let unknown = run(&mut conn, "explode", vec![]).await;
        assert!(matches!(unknown, Err(TxnError::CollaboratorFailure(_))));

        let bad_args = run(&mut conn, "write", vec![json!("one")]).await;
        assert!(matches!(bad_args, Err(TxnError::CollaboratorFailure(_))));
    }
}
