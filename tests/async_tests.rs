// Cooperative-async execution: gathered siblings, completion-order
// journaling, unfinished-child detection, and concurrent input requests.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use chronicle::{
    call_async, gather, invoke_async, request_input, AsyncInvokable, CallResult, Error, FieldMap,
    InputRequest, Resource, ResourceError, Store, TypeKey, Value,
};

#[derive(Clone, Debug, PartialEq)]
struct Wait;

impl Resource for Wait {
    fn type_key() -> TypeKey {
        TypeKey::new("tests.async.Wait")
    }

    fn field_names() -> &'static [&'static str] {
        &[]
    }

    fn field_values(&self) -> Vec<Value> {
        Vec::new()
    }

    fn from_fields(_fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self)
    }
}

#[async_trait]
impl AsyncInvokable for Wait {
    type Input = i64;
    type Output = i64;

    async fn call(&self, millis: i64) -> CallResult<i64> {
        tokio::time::sleep(Duration::from_millis(millis as u64)).await;
        Ok(millis)
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Gatherer;

impl Resource for Gatherer {
    fn type_key() -> TypeKey {
        TypeKey::new("tests.async.Gatherer")
    }

    fn field_names() -> &'static [&'static str] {
        &[]
    }

    fn field_values(&self) -> Vec<Value> {
        Vec::new()
    }

    fn from_fields(_fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self)
    }
}

#[async_trait]
impl AsyncInvokable for Gatherer {
    type Input = Value;
    type Output = Vec<i64>;

    async fn call(&self, _input: Value) -> CallResult<Vec<i64>> {
        let results = gather(vec![call_async(&Wait, 50), call_async(&Wait, 10)]).await;
        let mut outputs = Vec::new();
        for result in results {
            outputs.push(result?);
        }
        Ok(outputs)
    }
}

fn register_waiters() -> Result<()> {
    chronicle::register_async_invokable::<Wait>()?;
    chronicle::register_async_invokable::<Gatherer>()?;
    Ok(())
}

#[tokio::test]
async fn gathered_children_journal_in_completion_order() -> Result<()> {
    register_waiters()?;
    let store = Store::in_memory();
    store
        .scope_async(async {
            let invocation = invoke_async(&Gatherer, Value::Null).await?;

            // The body sees results in call order.
            assert_eq!(
                invocation.output()?,
                Value::List(vec![Value::Int(50), Value::Int(10)])
            );

            // The journal records children in completion order: the
            // shorter wait finished first.
            let children = invocation.children()?;
            assert_eq!(children.len(), 2);
            assert_eq!(children[0].output()?, Value::Int(10));
            assert_eq!(children[1].output()?, Value::Int(50));
            Ok(())
        })
        .await
}

#[tokio::test]
async fn async_replay_reuses_recorded_children() -> Result<()> {
    register_waiters()?;
    let store = Store::in_memory();
    store
        .scope_async(async {
            let invocation = invoke_async(&Gatherer, Value::Null).await?;
            let rewound = invocation.rewind(0)?;
            let replayed = rewound.replay_async().await?;

            assert_eq!(replayed.output()?, invocation.output()?);
            let outputs: Vec<Value> = replayed
                .children()?
                .iter()
                .map(|child| child.output())
                .collect::<chronicle::Result<_>>()?;
            assert!(outputs.contains(&Value::Int(10)));
            assert!(outputs.contains(&Value::Int(50)));
            Ok(())
        })
        .await
}

#[derive(Clone, Debug, PartialEq)]
struct Leaky;

impl Resource for Leaky {
    fn type_key() -> TypeKey {
        TypeKey::new("tests.async.Leaky")
    }

    fn field_names() -> &'static [&'static str] {
        &[]
    }

    fn field_values(&self) -> Vec<Value> {
        Vec::new()
    }

    fn from_fields(_fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self)
    }
}

#[async_trait]
impl AsyncInvokable for Leaky {
    type Input = Value;
    type Output = i64;

    async fn call(&self, _input: Value) -> CallResult<i64> {
        // A tracked child future created but never awaited.
        let abandoned = call_async(&Wait, 5);
        drop(abandoned);
        Ok(0)
    }
}

#[tokio::test]
async fn unfinished_children_fail_the_parent() -> Result<()> {
    register_waiters()?;
    chronicle::register_async_invokable::<Leaky>()?;
    let store = Store::in_memory();
    store
        .scope_async(async {
            match invoke_async(&Leaky, Value::Null).await {
                Err(Error::IncompleteSubinvocation { open, .. }) => assert_eq!(open, 1),
                other => panic!("expected incomplete subinvocation, got {:?}", other),
            }
            Ok(())
        })
        .await
}

#[derive(Clone, Debug, PartialEq)]
struct AskChild;

impl Resource for AskChild {
    fn type_key() -> TypeKey {
        TypeKey::new("tests.async.AskChild")
    }

    fn field_names() -> &'static [&'static str] {
        &[]
    }

    fn field_values(&self) -> Vec<Value> {
        Vec::new()
    }

    fn from_fields(_fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self)
    }
}

#[async_trait]
impl AsyncInvokable for AskChild {
    type Input = i64;
    type Output = i64;

    async fn call(&self, tag: i64) -> CallResult<i64> {
        let supplied = request_input(TypeKey::new("int"), Value::Int(tag), Value::Null)?;
        match supplied {
            Value::Int(n) => Ok(n),
            other => panic!("requested an int, got {}", other),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct AskBoth;

impl Resource for AskBoth {
    fn type_key() -> TypeKey {
        TypeKey::new("tests.async.AskBoth")
    }

    fn field_names() -> &'static [&'static str] {
        &[]
    }

    fn field_values(&self) -> Vec<Value> {
        Vec::new()
    }

    fn from_fields(_fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self)
    }
}

#[async_trait]
impl AsyncInvokable for AskBoth {
    type Input = Value;
    type Output = i64;

    async fn call(&self, _input: Value) -> CallResult<i64> {
        let results = gather(vec![call_async(&AskChild, 0), call_async(&AskChild, 1)]).await;
        let mut total = 0;
        for result in results {
            total += result?;
        }
        Ok(total)
    }
}

#[tokio::test]
async fn concurrent_input_requests_resolve_by_request_ref() -> Result<()> {
    chronicle::register_async_invokable::<AskChild>()?;
    chronicle::register_async_invokable::<AskBoth>()?;
    let store = Store::in_memory();
    store
        .scope_async(async {
            let invocation = invoke_async(&AskBoth, Value::Null).await?;
            assert!(!invocation.successful()?);

            // Both gathered children suspended; each request is keyed by
            // its own condition digest.
            let pending = invocation.pending_input_requests()?;
            assert_eq!(pending.len(), 2);
            assert_ne!(pending[0].digest, pending[1].digest);

            let mut inputs = HashMap::new();
            for request in &pending {
                let tag = match request.request.for_value.checkout()?.wrapped {
                    Value::Int(tag) => tag,
                    other => panic!("unexpected for_value {}", other),
                };
                inputs.insert(request.digest, Value::Int(100 * (tag + 1)));
            }

            let resolved = invocation.continue_with(inputs).await?;
            assert!(resolved.successful()?);
            assert_eq!(resolved.output()?, Value::Int(300));
            Ok(())
        })
        .await
}

#[tokio::test]
async fn suspended_async_runs_record_the_requests() -> Result<()> {
    chronicle::register_async_invokable::<AskChild>()?;
    let store = Store::in_memory();
    store
        .scope_async(async {
            let invocation = invoke_async(&AskChild, 7).await?;
            let raised = invocation.raised()?.expect("run suspended");
            let request = raised.downcast::<InputRequest>().expect("input request");
            assert_eq!(request.for_value.checkout()?.wrapped, Value::Int(7));
            Ok(())
        })
        .await
}
