use super::{BTree, BTreeOptions, BlockStore, FixedMap, Visitor};
use crate::primitives::arena::BlockArena;
use crate::types::{BlockId, Result, SifterError};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::ControlFlow;

const SMALL_BLOCK: usize = 96;

fn small_tree() -> BTree {
    BTree::new(BTreeOptions::new(4, 4).with_block_size(SMALL_BLOCK)).unwrap()
}

fn k(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

fn collect<S: BlockStore>(tree: &BTree<S>) -> Vec<(u32, u32)> {
    tree.iter()
        .map(|(key, value)| {
            (
                u32::from_be_bytes(key.try_into().unwrap()),
                u32::from_be_bytes(value.try_into().unwrap()),
            )
        })
        .collect()
}

fn assert_matches_model<S: BlockStore>(tree: &BTree<S>, model: &BTreeMap<u32, u32>) -> Result<()> {
    tree.verify()?;
    assert_eq!(tree.len(), model.len() as u64);
    let expected: Vec<(u32, u32)> = model.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(collect(tree), expected);
    Ok(())
}

#[test]
fn insert_search_delete_roundtrip() -> Result<()> {
    let mut tree = small_tree();
    assert!(tree.search(&k(1)).is_none());
    for key in 0..500u32 {
        assert!(tree.insert(&k(key * 3), &k(key))?);
    }
    tree.verify()?;
    assert!(tree.height() >= 2, "expected a multi-level tree");
    for key in 0..500u32 {
        assert_eq!(tree.search(&k(key * 3)), Some(&k(key)[..]));
        assert!(tree.search(&k(key * 3 + 1)).is_none());
    }
    for key in 0..500u32 {
        assert!(tree.delete(&k(key * 3))?);
        assert!(tree.search(&k(key * 3)).is_none());
    }
    assert!(tree.is_empty());
    assert_eq!(tree.root(), None);
    assert_eq!(tree.height(), 0);
    assert_eq!(tree.store().live_blocks(), 0);
    Ok(())
}

#[test]
fn reinserting_identical_pair_is_a_noop() -> Result<()> {
    let mut tree = small_tree();
    for key in 0..100u32 {
        tree.insert(&k(key), &k(key))?;
    }
    let root = tree.root();
    let blocks = tree.store().live_blocks();
    let before = tree.stats_snapshot();
    assert!(!tree.insert(&k(42), &k(42))?);
    assert_eq!(tree.len(), 100);
    assert_eq!(tree.root(), root);
    assert_eq!(tree.store().live_blocks(), blocks);
    assert_eq!(tree.stats_snapshot().inserts, before.inserts);

    assert!(tree.insert(&k(42), &k(7))?);
    assert_eq!(tree.len(), 100);
    assert_eq!(tree.search(&k(42)), Some(&k(7)[..]));
    Ok(())
}

#[test]
fn deleting_absent_keys_is_benign() -> Result<()> {
    let mut tree = small_tree();
    assert!(!tree.delete(&k(5))?);
    for key in 10..60u32 {
        tree.insert(&k(key), &k(0))?;
    }
    assert!(!tree.delete(&k(5))?);
    assert!(!tree.delete(&k(61))?);
    assert!(!tree.delete(&k(1000))?);
    assert_eq!(tree.len(), 50);
    tree.verify()?;
    assert!(matches!(tree.delete(&[1, 2]), Err(SifterError::Invalid(_))));
    Ok(())
}

#[test]
fn first_and_last_follow_edges() -> Result<()> {
    let mut tree = small_tree();
    assert!(tree.first().is_none());
    for key in [50u32, 10, 90, 30, 70] {
        tree.insert(&k(key), &k(key + 1))?;
    }
    for key in 100..300u32 {
        tree.insert(&k(key), &k(key))?;
    }
    assert_eq!(tree.first(), Some((&k(10)[..], &k(11)[..])));
    assert_eq!(tree.last(), Some((&k(299)[..], &k(299)[..])));
    tree.insert(&k(1), &k(2))?;
    assert_eq!(tree.first().map(|(key, _)| key.to_vec()), Some(k(1).to_vec()));
    Ok(())
}

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
    stop_after_values: Option<usize>,
    values: usize,
}

impl Visitor for Recorder {
    fn block(&mut self, _id: BlockId, level: u8) -> ControlFlow<()> {
        self.events.push(format!("block@{level}"));
        ControlFlow::Continue(())
    }

    fn key(&mut self, level: u8, key: &[u8]) -> ControlFlow<()> {
        self.events.push(format!("key@{level}:{}", key[3]));
        ControlFlow::Continue(())
    }

    fn value(&mut self, _value: &[u8]) -> ControlFlow<()> {
        self.values += 1;
        match self.stop_after_values {
            Some(limit) if self.values >= limit => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    }
}

#[test]
fn visit_is_pre_order() -> Result<()> {
    let mut tree = small_tree();
    for key in 0..11u32 {
        tree.insert(&k(key), &k(key))?;
    }
    assert_eq!(tree.height(), 1);
    let mut recorder = Recorder::default();
    assert!(tree.visit(&mut recorder).is_continue());
    assert_eq!(recorder.events[0], "block@1");
    assert_eq!(recorder.events[1], "key@1:0");
    assert_eq!(recorder.events[2], "block@0");
    assert_eq!(recorder.events[3], "key@0:0");
    assert_eq!(recorder.values, 11);

    let mut stopper = Recorder {
        stop_after_values: Some(3),
        ..Recorder::default()
    };
    assert!(tree.visit(&mut stopper).is_break());
    assert_eq!(stopper.values, 3);
    Ok(())
}

#[test]
fn full_leaf_redistributes_before_splitting() -> Result<()> {
    let mut tree = small_tree();
    for key in 0..11u32 {
        tree.insert(&k(key * 10), &k(key))?;
    }
    let splits = tree.stats().splits();
    assert_eq!(splits, 1);
    // The left leaf keeps spare room, so filling the right leaf shifts entries left.
    for key in 0..5u32 {
        tree.insert(&k(1000 + key), &k(key))?;
    }
    tree.verify()?;
    assert!(tree.stats().rebalances() > 0);
    assert_eq!(tree.stats().splits(), splits);
    Ok(())
}

#[test]
fn clone_mutations_leave_source_untouched() -> Result<()> {
    let mut source = small_tree();
    let mut model = BTreeMap::new();
    for key in 0..400u32 {
        source.insert(&k(key * 2), &k(key))?;
        model.insert(key * 2, key);
    }
    let source_blocks = source.store().live_blocks();

    let mut arena = BlockArena::new(SMALL_BLOCK);
    {
        let mut clone = source.snapshot(&mut arena)?;
        assert_eq!(clone.generation(), 1);
        let mut clone_model = model.clone();
        for key in 0..200u32 {
            clone.delete(&k(key * 4))?;
            clone_model.remove(&(key * 4));
            clone.insert(&k(key * 2 + 1), &k(9))?;
            clone_model.insert(key * 2 + 1, 9);
        }
        clone.insert(&k(2), &k(77))?;
        clone_model.insert(2, 77);
        assert_matches_model(&clone, &clone_model)?;
        assert!(clone.stats().cow_copies() > 0);
        assert!(clone.store().live_blocks() > 0);

        assert_matches_model(&source, &model)?;
    }
    assert_eq!(arena.live_blocks(), 0);
    assert_matches_model(&source, &model)?;
    assert_eq!(source.store().live_blocks(), source_blocks);
    Ok(())
}

#[test]
fn clone_of_clone_shares_both_generations() -> Result<()> {
    let mut source = small_tree();
    for key in 0..200u32 {
        source.insert(&k(key), &k(key))?;
    }
    let mut first_arena = BlockArena::new(SMALL_BLOCK);
    let mut second_arena = BlockArena::new(SMALL_BLOCK);
    let mut first = source.snapshot(&mut first_arena)?;
    for key in 0..50u32 {
        first.delete(&k(key))?;
    }
    let first_view = collect(&first);
    {
        let mut second = first.snapshot(&mut second_arena)?;
        assert_eq!(second.generation(), 2);
        for key in 50..120u32 {
            second.delete(&k(key))?;
        }
        second.insert(&k(1_000), &k(1))?;
        second.verify()?;
        assert_eq!(second.len(), 81);
        assert_eq!(collect(&first), first_view);
    }
    first.verify()?;
    assert_eq!(first.len(), 150);
    assert_eq!(source.len(), 200);
    Ok(())
}

#[test]
fn bounded_clone_arena_reports_exhaustion() -> Result<()> {
    let mut source = small_tree();
    for key in 0..300u32 {
        source.insert(&k(key), &k(key))?;
    }
    let mut arena = BlockArena::with_limit(SMALL_BLOCK, 2);
    let mut clone = source.snapshot(&mut arena)?;
    let mut failure = None;
    for key in 0..300u32 {
        if let Err(err) = clone.delete(&k(key)) {
            failure = Some(err);
            break;
        }
    }
    assert!(matches!(failure, Some(SifterError::ArenaExhausted { capacity: 2 })));
    drop(clone);
    assert_eq!(arena.live_blocks(), 0);
    source.verify()
}

#[test]
fn snapshot_rejects_mismatched_arena() {
    let source = small_tree();
    let mut arena = BlockArena::new(SMALL_BLOCK * 2);
    assert!(matches!(
        source.snapshot(&mut arena),
        Err(SifterError::Invalid(_))
    ));
}

#[test]
fn custom_comparator_orders_descending() -> Result<()> {
    fn reverse(a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }
    let options = BTreeOptions::new(4, 4)
        .with_block_size(SMALL_BLOCK)
        .with_compare(reverse);
    let mut tree = BTree::new(options)?;
    for key in 0..100u32 {
        tree.insert(&k(key), &k(key))?;
    }
    tree.verify()?;
    assert_eq!(tree.first().map(|(key, _)| key.to_vec()), Some(k(99).to_vec()));
    assert_eq!(tree.search(&k(17)), Some(&k(17)[..]));
    Ok(())
}

#[test]
fn fixed_map_decodes_typed_entries() -> Result<()> {
    let mut map: FixedMap<u32, u64> = FixedMap::new(128)?;
    for key in (0..100u32).rev() {
        map.insert(&key, &(u64::from(key) << 40))?;
    }
    assert_eq!(map.get(&7), Some(7u64 << 40));
    assert_eq!(map.first(), Some((0, 0)));
    assert_eq!(map.last(), Some((99, 99u64 << 40)));
    assert!(map.remove(&7)?);
    assert!(!map.contains_key(&7));
    assert_eq!(map.keys().len(), 99);
    let mut seen = 0;
    map.for_each(|_, _| {
        seen += 1;
        if seen == 10 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    assert_eq!(seen, 10);

    let mut unit: FixedMap<u32, ()> = FixedMap::new(64)?;
    assert!(unit.insert(&3, &())?);
    assert!(!unit.insert(&3, &())?);
    assert_eq!(unit.last(), Some((3, ())));
    map.verify()
}

#[test]
fn random_workload_matches_reference() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(0x51F7);
    let mut tree = small_tree();
    let mut model = BTreeMap::new();
    for step in 0..6_000 {
        let key = rng.gen_range(0..1_500u32);
        if rng.gen_bool(0.6) {
            let value = rng.gen::<u32>();
            let changed = tree.insert(&k(key), &k(value))?;
            let previous = model.insert(key, value);
            assert_eq!(changed, previous != Some(value));
        } else {
            assert_eq!(tree.delete(&k(key))?, model.remove(&key).is_some());
        }
        if step % 500 == 0 {
            assert_matches_model(&tree, &model)?;
        }
    }
    assert_matches_model(&tree, &model)
}

#[derive(Debug, Clone)]
enum Op {
    Insert(u16, u8),
    Delete(u16),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u16..400, any::<u8>()).prop_map(|(k, v)| Op::Insert(k, v)),
        (0u16..400).prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

    #[test]
    fn operations_preserve_order_and_count(ops in proptest::collection::vec(op_strategy(), 1..400)) {
        let mut tree = small_tree();
        let mut model = BTreeMap::new();
        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    tree.insert(&k(key.into()), &k(value.into())).unwrap();
                    model.insert(u32::from(key), u32::from(value));
                }
                Op::Delete(key) => {
                    tree.delete(&k(key.into())).unwrap();
                    model.remove(&u32::from(key));
                }
            }
        }
        prop_assert!(tree.verify().is_ok());
        prop_assert_eq!(tree.len(), model.len() as u64);
        let expected: Vec<(u32, u32)> = model.into_iter().collect();
        prop_assert_eq!(collect(&tree), expected);
    }

    #[test]
    fn clone_writes_never_reach_source(
        base in proptest::collection::btree_set(0u16..300, 1..200),
        ops in proptest::collection::vec(op_strategy(), 1..200),
    ) {
        let mut source = small_tree();
        for key in &base {
            source.insert(&k((*key).into()), &k(1)).unwrap();
        }
        let before = collect(&source);
        let mut arena = BlockArena::new(SMALL_BLOCK);
        {
            let mut clone = source.snapshot(&mut arena).unwrap();
            for op in ops {
                match op {
                    Op::Insert(key, value) => {
                        clone.insert(&k(key.into()), &k(value.into())).unwrap();
                    }
                    Op::Delete(key) => {
                        clone.delete(&k(key.into())).unwrap();
                    }
                }
            }
            prop_assert!(clone.verify().is_ok());
        }
        prop_assert!(source.verify().is_ok());
        prop_assert_eq!(collect(&source), before);
        prop_assert_eq!(arena.live_blocks(), 0);
    }
}
