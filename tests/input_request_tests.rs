// The input-request protocol: suspension via recorded raises and
// resolution via replay overrides.

use anyhow::Result;

use chronicle::{
    invoke, register_invokable, request_input, CallResult, Error, FieldMap, InputRequest,
    Invokable, InvocationGenerator, Resource, ResourceError, Store, TypeKey, Value,
};

#[derive(Clone, Debug, PartialEq)]
struct SumInputs;

impl Resource for SumInputs {
    fn type_key() -> TypeKey {
        TypeKey::new("tests.input.SumInputs")
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

impl Invokable for SumInputs {
    type Input = Value;
    type Output = i64;

    fn call(&self, _input: Value) -> CallResult<i64> {
        let mut total = 0;
        for i in 0..10 {
            let supplied = request_input(TypeKey::new("int"), Value::Int(i), Value::Null)?;
            match supplied {
                Value::Int(n) => total += n,
                other => panic!("requested an int, got {}", other),
            }
        }
        Ok(total)
    }
}

#[test]
fn input_requests_resolve_through_the_generator() -> Result<()> {
    register_invokable::<SumInputs>()?;
    let store = Store::in_memory();
    store.scope(|| -> Result<()> {
        let mut generator = InvocationGenerator::start(&SumInputs, Value::Null)?;
        assert!(!generator.complete()?);

        let mut answered = 0;
        let mut pending = generator.next_request()?;
        while let Some(request) = pending {
            let for_value = request.request.for_value.checkout()?.wrapped;
            let i = match for_value {
                Value::Int(i) => i,
                other => panic!("unexpected for_value {}", other),
            };
            answered += 1;
            pending = generator.send(Value::Int(i % 7 + 1))?;
        }

        assert_eq!(answered, 10);
        assert!(generator.complete()?);
        // sum of (i mod 7) + 1 for i in 0..10
        assert_eq!(generator.invocation().output()?, Value::Int(34));
        Ok(())
    })
}

#[test]
fn suspended_runs_commit_cleanly() -> Result<()> {
    register_invokable::<SumInputs>()?;
    let store = Store::in_memory();
    store.scope(|| -> Result<()> {
        let invocation = invoke(&SumInputs, Value::Null)?;
        assert!(!invocation.successful()?);

        let raised = invocation.raised()?.expect("run suspended on a raise");
        let request = raised
            .downcast::<InputRequest>()
            .expect("the raise is an input request");
        assert_eq!(request.requested_type, TypeKey::new("int"));
        assert_eq!(request.for_value.checkout()?.wrapped, Value::Int(0));

        // The request originated in the dedicated child node, not the
        // body's own invocation.
        assert!(!invocation.raised_here()?);
        let child = invocation.child(0)?;
        assert!(child.raised_here()?);
        Ok(())
    })
}

#[test]
fn single_requests_resolve_directly() -> Result<()> {
    register_invokable::<SumInputs>()?;
    let store = Store::in_memory();
    store.scope(|| -> Result<()> {
        let invocation = invoke(&SumInputs, Value::Null)?;
        let pending = invocation.pending_input_requests()?;
        assert_eq!(pending.len(), 1);

        let next = invocation.resolve_input(pending[0].digest, Value::Int(5))?;
        // The first answer is journaled; the run is now suspended on the
        // second request.
        let pending = next.pending_input_requests()?;
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].request.for_value.checkout()?.wrapped,
            Value::Int(1)
        );
        Ok(())
    })
}

#[test]
fn generator_rejects_mismatched_inputs() -> Result<()> {
    register_invokable::<SumInputs>()?;
    let store = Store::in_memory();
    store.scope(|| -> Result<()> {
        let mut generator = InvocationGenerator::start(&SumInputs, Value::Null)?;
        assert!(generator.next_request()?.is_some());

        let result = generator.send(Value::Str("not an int".to_string()));
        assert!(matches!(
            result,
            Err(Error::Resource(ResourceError::UnexpectedKind { .. }))
        ));

        // A proper value still goes through afterwards.
        assert!(generator.send(Value::Int(3))?.is_some());
        Ok(())
    })
}

#[test]
fn requesting_input_outside_an_invocation_fails() {
    let store = Store::in_memory();
    store.scope(|| {
        let result = request_input(TypeKey::new("int"), Value::Null, Value::Null);
        assert!(matches!(
            result,
            Err(chronicle::CallError::Fault(
                Error::InputRequestOutsideInvocation
            ))
        ));
    });
}
