//! Chain composition properties

use proptest::prelude::*;
use std::time::Duration;
use volley_chain::{Action, Chain, Effect};

fn labelled(labels: &[u8]) -> Chain {
    labels.iter().fold(Chain::new(), |chain, label| {
        chain.exec_named(format!("step-{label}"), |s| s)
    })
}

fn names(chain: &Chain) -> Vec<String> {
    chain
        .actions()
        .map(|action| match action {
            Action::Exec(effect) => effect.name().to_string(),
            other => other.kind().to_string(),
        })
        .collect()
}

proptest! {
    #[test]
    fn append_is_associative(
        a in prop::collection::vec(any::<u8>(), 0..8),
        b in prop::collection::vec(any::<u8>(), 0..8),
        c in prop::collection::vec(any::<u8>(), 0..8),
    ) {
        let (a, b, c) = (labelled(&a), labelled(&b), labelled(&c));
        let left = a.append(b.clone()).append(c.clone());
        let right = a.append(b.append(c));
        prop_assert_eq!(names(&left), names(&right));
    }

    #[test]
    fn empty_chain_is_neutral(a in prop::collection::vec(any::<u8>(), 0..8)) {
        let a = labelled(&a);
        prop_assert_eq!(names(&a.append(Chain::new())), names(&a));
        prop_assert_eq!(names(&Chain::new().append(a.clone())), names(&a));
    }
}

#[test]
fn closing_a_block_keeps_preceding_actions() {
    let chain = Chain::new()
        .exec_named("before", |s| s)
        .during(Duration::from_secs(1))
        .on(Chain::new().exec_named("body", |s| s))
        .unwrap()
        .exec_named("after", |s| s);
    assert_eq!(names(&chain), vec!["before", "loop", "after"]);
}

#[test]
fn a_shared_chain_can_be_extended_two_ways() {
    let base = Chain::new().exec_named("login", |s| s);
    let browse = base.exec_named("browse", |s| s);
    let buy = base.exec_named("buy", |s| s);
    assert_eq!(names(&base), vec!["login"]);
    assert_eq!(names(&browse), vec!["login", "browse"]);
    assert_eq!(names(&buy), vec!["login", "buy"]);
}
