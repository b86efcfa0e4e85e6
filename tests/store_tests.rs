// Store, ref and digest behavior: commit/checkout round trips, DAG
// construction, modify isolation, and the filesystem backend.

use anyhow::Result;

use chronicle::{
    register, Digest, Error, FieldMap, Ref, RegistryError, Resource, ResourceError, Store, TypeKey,
    Value,
};

#[derive(Clone, Debug, PartialEq)]
struct MyResource {
    my_field: String,
    my_other_field: i64,
}

impl Resource for MyResource {
    fn type_key() -> TypeKey {
        TypeKey::new("tests.store.MyResource")
    }

    fn field_names() -> &'static [&'static str] {
        &["my_field", "my_other_field"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            Value::Str(self.my_field.clone()),
            Value::Int(self.my_other_field),
        ]
    }

    fn from_fields(fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self {
            my_field: fields.take_as("my_field")?,
            my_other_field: fields.take_as("my_other_field")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
struct LinkedList {
    value: i64,
    next: Option<Ref<LinkedList>>,
}

impl Resource for LinkedList {
    fn type_key() -> TypeKey {
        TypeKey::new("tests.store.LinkedList")
    }

    fn field_names() -> &'static [&'static str] {
        &["value", "next"]
    }

    fn field_values(&self) -> Vec<Value> {
        use chronicle::FieldValue;
        vec![Value::Int(self.value), self.next.clone().into_value()]
    }

    fn from_fields(fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self {
            value: fields.take_as("value")?,
            next: fields.take_as("next")?,
        })
    }
}

#[test]
fn commit_checkout_round_trip() -> Result<()> {
    register::<MyResource>()?;
    let store = Store::in_memory();
    store.scope(|| -> Result<()> {
        let value = MyResource {
            my_field: "hello".to_string(),
            my_other_field: 42,
        };
        let committed = chronicle::commit(&value)?;
        assert_eq!(committed.digest().to_hex().len(), 64);
        assert!(store.has(&committed.digest())?);
        assert_eq!(committed.checkout()?, value);

        // Committing the structurally equal value yields the equal ref.
        let again = chronicle::commit(&value.clone())?;
        assert_eq!(again, committed);
        Ok(())
    })
}

#[test]
fn structurally_distinct_values_get_distinct_digests() -> Result<()> {
    register::<MyResource>()?;
    let store = Store::in_memory();
    store.scope(|| -> Result<()> {
        let a = chronicle::commit(&MyResource {
            my_field: "a".to_string(),
            my_other_field: 1,
        })?;
        let b = chronicle::commit(&MyResource {
            my_field: "a".to_string(),
            my_other_field: 2,
        })?;
        assert_ne!(a.digest(), b.digest());
        Ok(())
    })
}

#[test]
fn linked_list_builds_a_dag() -> Result<()> {
    register::<LinkedList>()?;
    let store = Store::in_memory();
    store.scope(|| -> Result<()> {
        let third = chronicle::commit(&LinkedList {
            value: 3,
            next: None,
        })?;
        let second = chronicle::commit(&LinkedList {
            value: 2,
            next: Some(third.clone()),
        })?;
        let first = chronicle::commit(&LinkedList {
            value: 1,
            next: Some(second.clone()),
        })?;

        let digests = [first.digest(), second.digest(), third.digest()];
        assert_ne!(digests[0], digests[1]);
        assert_ne!(digests[1], digests[2]);
        assert_ne!(digests[0], digests[2]);

        let mut values = Vec::new();
        let mut node = Some(first.checkout()?);
        while let Some(current) = node {
            values.push(current.value);
            node = match current.next {
                Some(next) => Some(next.checkout()?),
                None => None,
            };
        }
        assert_eq!(values, vec![1, 2, 3]);
        Ok(())
    })
}

#[test]
fn modify_rebinds_only_the_modified_ref() -> Result<()> {
    register::<MyResource>()?;
    let store = Store::in_memory();
    store.scope(|| -> Result<()> {
        let mut current = chronicle::commit(&MyResource {
            my_field: "versioned".to_string(),
            my_other_field: 42,
        })?;
        let before = current.deepcopy();

        current.modify(|value| value.my_other_field = 43)?;

        assert_ne!(current.digest(), before.digest());
        assert_eq!(current.checkout()?.my_other_field, 43);
        // The copy taken before the modify still resolves to the old
        // version.
        assert_eq!(before.checkout()?.my_other_field, 42);
        Ok(())
    })
}

#[test]
fn store_operations_require_a_scope() {
    register::<MyResource>().unwrap();
    let result = chronicle::commit(&MyResource {
        my_field: "nowhere".to_string(),
        my_other_field: 0,
    });
    assert!(matches!(result, Err(Error::NoActiveStore)));
}

#[test]
fn missing_digests_are_not_found() {
    register::<MyResource>().unwrap();
    let store = Store::in_memory();
    store.scope(|| {
        let dangling: Ref<MyResource> = Ref::from_digest(Digest::of(b"never committed"));
        assert!(matches!(dangling.checkout(), Err(Error::NotFound(_))));
    });
}

#[derive(Clone, Debug, PartialEq)]
struct Unregistered {
    n: i64,
}

impl Resource for Unregistered {
    fn type_key() -> TypeKey {
        TypeKey::new("tests.store.Unregistered")
    }

    fn field_names() -> &'static [&'static str] {
        &["n"]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Int(self.n)]
    }

    fn from_fields(fields: &mut FieldMap) -> std::result::Result<Self, ResourceError> {
        Ok(Self {
            n: fields.take_as("n")?,
        })
    }
}

#[test]
fn checkout_of_unknown_type_fails() {
    let store = Store::in_memory();
    store.scope(|| {
        // Commit does not consult the registry; unpack does.
        let committed = store.commit(&Unregistered { n: 1 }).unwrap();
        let bare: Ref<Unregistered> = Ref::from_digest(committed.digest());
        match bare.checkout() {
            Err(Error::Registry(RegistryError::UnknownTypeId(_))) => {}
            other => panic!("expected unknown type id error, got {:?}", other),
        }
    });
}

#[test]
fn dependency_graph_follows_links() -> Result<()> {
    register::<LinkedList>()?;
    let store = Store::in_memory();
    store.scope(|| -> Result<()> {
        let leaf = chronicle::commit(&LinkedList {
            value: 2,
            next: None,
        })?;
        let root = chronicle::commit(&LinkedList {
            value: 1,
            next: Some(leaf.clone()),
        })?;

        let graph = store.dependency_graph(&[root.digest()], None)?;
        let root_links = graph[&root.digest()].clone().expect("root resolves");
        assert!(root_links.contains(&leaf.digest()));
        let leaf_links = graph[&leaf.digest()].clone().expect("leaf resolves");
        assert!(leaf_links.is_empty());

        // Depth zero stops before the leaf.
        let shallow = store.dependency_graph(&[root.digest()], Some(0))?;
        assert!(shallow.contains_key(&root.digest()));
        assert!(!shallow.contains_key(&leaf.digest()));
        Ok(())
    })
}

#[test]
fn file_store_round_trips_and_persists() -> Result<()> {
    register::<MyResource>()?;
    let dir = tempfile::tempdir()?;

    let value = MyResource {
        my_field: "on disk".to_string(),
        my_other_field: 7,
    };
    let digest = {
        let store = Store::file(dir.path())?;
        store.scope(|| chronicle::commit(&value))?.digest()
    };

    // A fresh store over the same directory sees the object.
    let reopened = Store::file(dir.path())?;
    reopened.scope(|| -> Result<()> {
        let restored: Ref<MyResource> = Ref::from_digest(digest);
        assert_eq!(restored.checkout()?, value);
        Ok(())
    })
}

#[tokio::test]
async fn async_commit_and_checkout() -> Result<()> {
    register::<MyResource>()?;
    let store = Store::in_memory();
    store
        .scope_async(async {
            let value = MyResource {
                my_field: "async".to_string(),
                my_other_field: 1,
            };
            let store = Store::current()?;
            let committed = store.commit_async(&value).await?;
            let bare: Ref<MyResource> = Ref::from_digest(committed.digest());
            assert_eq!(store.checkout_async(&bare).await?, value);
            Ok(())
        })
        .await
}
