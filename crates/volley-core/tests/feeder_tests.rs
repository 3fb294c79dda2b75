//! Feeder behaviour under concurrent pulls

use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use volley_core::{Feeder, FeederError, Record, RecordSource};

fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record::from([("id".to_string(), json!(i))]))
        .collect()
}

proptest! {
    #[test]
    fn queue_hands_out_each_record_once(len in 1usize..64, pullers in 1usize..8) {
        let feeder = Arc::new(Feeder::new("q", records(len)).unwrap());
        let handles: Vec<_> = (0..pullers)
            .map(|_| {
                let feeder = Arc::clone(&feeder);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(record) = feeder.next_record() {
                        seen.push(record["id"].as_u64().unwrap());
                    }
                    seen
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        let distinct: HashSet<u64> = all.iter().copied().collect();
        prop_assert_eq!(all.len(), len);
        prop_assert_eq!(distinct.len(), len);
    }

    #[test]
    fn circular_wraps_to_first_record(len in 1usize..16, pulls in 1usize..64) {
        let feeder = Feeder::new("c", records(len)).unwrap().circular();
        for i in 0..pulls {
            let record = feeder.next_record().unwrap();
            prop_assert_eq!(record["id"].as_u64().unwrap() as usize, i % len);
        }
    }
}

#[test]
fn queue_reports_exhaustion_on_the_extra_pull() {
    let feeder = Feeder::new("accounts", records(3)).unwrap();
    for _ in 0..3 {
        feeder.next_record().unwrap();
    }
    assert_eq!(
        feeder.next_record().unwrap_err(),
        FeederError::Exhausted {
            feeder: "accounts".into()
        }
    );
}

#[test]
fn json_file_names_feeder_after_stem() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.json");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, r#"[{{"user": "a"}}, {{"user": "b"}}]"#).unwrap();

    let feeder = Feeder::from_json_file(&path).unwrap();
    assert_eq!(feeder.name(), "users");
    assert_eq!(feeder.len(), 2);
    assert_eq!(feeder.next_record().unwrap()["user"], json!("a"));
}

#[test]
fn missing_json_file_is_a_load_error() {
    let err = Feeder::from_json_file("/definitely/not/here.json").unwrap_err();
    assert!(matches!(err, FeederError::Load(_)));
}

#[test]
fn csv_file_feeds_header_keyed_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("search.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "searchCriterion,searchComputerName").unwrap();
    writeln!(file, "Macbook,MacBook Pro").unwrap();
    writeln!(file, "eee,ASUS Eee PC 1005PE").unwrap();
    drop(file);

    let feeder = Feeder::from_csv_file(&path).unwrap().random().with_seed(5);
    assert_eq!(feeder.name(), "search");
    assert_eq!(feeder.len(), 2);
    for _ in 0..20 {
        let record = feeder.next_record().unwrap();
        assert!(record.contains_key("searchCriterion"));
        assert!(record.contains_key("searchComputerName"));
    }
}

#[test]
fn header_only_csv_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.csv");
    std::fs::write(&path, "id,name\n").unwrap();

    let err = Feeder::from_csv_file(&path).unwrap_err();
    assert!(matches!(err, FeederError::Load(_)));
}
