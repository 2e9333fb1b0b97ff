//! Records written through one SQLite store instance are visible after
//! reopening the same file.

use linkrec_core::{DeliveryRecord, DeliveryState, DeliveryTag, LinkIdentifier, Outcome, Role};
use linkrec_store::{DeliveryStore, InMemoryDeliveryStore, SqliteDeliveryStore};

fn terminus() -> LinkIdentifier {
    LinkIdentifier::new("billing", Role::Sender, Some("broker-a".to_owned())).expect("valid")
}

#[test]
fn records_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("deliveries.db");

    {
        let store = SqliteDeliveryStore::open(&path).expect("open");
        store
            .save(
                &terminus(),
                &DeliveryRecord::new("t1".into(), DeliveryState::PendingAcknowledged),
            )
            .expect("save t1");
        store
            .save(
                &terminus(),
                &DeliveryRecord::new("t2".into(), DeliveryState::Terminal(Outcome::Modified)),
            )
            .expect("save t2");
    }

    let reopened = SqliteDeliveryStore::open(&path).expect("reopen");
    let records = reopened.retrieve_all(&terminus()).expect("retrieve_all");
    assert_eq!(records.len(), 2);
    assert_eq!(
        records.get(&DeliveryTag::from("t2")).map(|r| r.state),
        Some(DeliveryState::Terminal(Outcome::Modified))
    );
}

/// Both implementations satisfy the same contract.
#[test]
fn implementations_agree() {
    let stores: Vec<Box<dyn DeliveryStore>> = vec![
        Box::new(InMemoryDeliveryStore::new()),
        Box::new(SqliteDeliveryStore::open_in_memory().expect("open")),
    ];

    for store in stores {
        let id = terminus();
        assert!(store.retrieve(&id, &"x".into()).expect("retrieve").is_none());

        store
            .save(&id, &DeliveryRecord::new("x".into(), DeliveryState::TransactionalPending))
            .expect("save");
        store
            .save(
                &id,
                &DeliveryRecord::new(
                    "x".into(),
                    DeliveryState::TransactionalTerminal(Outcome::Accepted),
                ),
            )
            .expect("advance");
        assert!(
            store
                .save(
                    &id,
                    &DeliveryRecord::new("x".into(), DeliveryState::Terminal(Outcome::Accepted)),
                )
                .is_err(),
            "transactional record cannot leave the transactional track"
        );

        assert!(store.remove(&id, &"x".into()).expect("remove"));
        assert_eq!(store.remove_all(&id).expect("remove_all"), 0);
    }
}

/// Link names containing `/` never share records across termini.
#[test]
fn implementations_keep_slashed_names_apart() {
    let stores: Vec<Box<dyn DeliveryStore>> = vec![
        Box::new(InMemoryDeliveryStore::new()),
        Box::new(SqliteDeliveryStore::open_in_memory().expect("open")),
    ];
    let topic = LinkIdentifier::new("orders/eu", Role::Sender, Some("broker".to_owned()))
        .expect("valid");
    let nested = LinkIdentifier::new("eu", Role::Sender, Some("broker/orders".to_owned()))
        .expect("valid");

    for store in stores {
        store
            .save(&topic, &DeliveryRecord::new("t1".into(), DeliveryState::PendingUnknown))
            .expect("save");
        store
            .save(&nested, &DeliveryRecord::new("t2".into(), DeliveryState::PendingUnknown))
            .expect("save");

        assert_eq!(store.remove_all(&nested).expect("remove_all"), 1);
        let left = store.retrieve_all(&topic).expect("retrieve_all");
        assert_eq!(left.len(), 1);
        assert!(left.contains_key(&DeliveryTag::from("t1")));
    }
}
