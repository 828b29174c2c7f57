use esif_arbiter_core::*;
use proptest::prelude::*;

fn key() -> EntryKey {
    EntryKey::new(PrimitiveId(36), Domain::D0, Instance(0))
}

fn entry(arb_type: Option<ArbitrationType>, limits: Limits) -> EntryState {
    EntryState::new(EntryParams { key: key(), arb_type, limits })
}

fn winner(e: &EntryState) -> Option<u32> {
    e.winner().and_then(|w| w.payload.as_u32())
}

const A: AppHandle = AppHandle(0xA);
const B: AppHandle = AppHandle(0xB);
const C: AppHandle = AppHandle(0xC);

#[test]
fn greater_than_keeps_max_at_head() {
    let mut e = entry(Some(ArbitrationType::GreaterThan), Limits::default());

    let c = e.submit(A, Payload::from_u32(5)).unwrap();
    assert_eq!(c.map(|c| c.payload.as_u32()), Some(Some(5)));

    let c = e.submit(B, Payload::from_u32(9)).unwrap().expect("new winner");
    assert_eq!(c.payload.as_u32(), Some(9));
    assert!(c.requires_delay);

    // Losing request: no corrective job.
    assert_eq!(e.submit(C, Payload::from_u32(7)).unwrap(), None);
    assert_eq!(winner(&e), Some(9));
    let order: Vec<u32> = e.requests().iter().filter_map(|r| r.payload.as_u32()).collect();
    assert_eq!(order, vec![9, 7, 5]);
}

#[test]
fn resubmission_replaces_prior_request() {
    let mut e = entry(Some(ArbitrationType::GreaterThan), Limits::default());
    e.submit(A, Payload::from_u32(5)).unwrap();
    e.submit(B, Payload::from_u32(9)).unwrap();
    e.submit(B, Payload::from_u32(1)).unwrap();

    assert_eq!(e.requests().len(), 2);
    assert_eq!(e.requests().iter().filter(|r| r.app == B).count(), 1);
    assert_eq!(winner(&e), Some(5));
}

#[test]
fn resubmitting_same_value_still_reapplies() {
    let mut e = entry(Some(ArbitrationType::GreaterThan), Limits::default());
    e.submit(A, Payload::from_u32(5)).unwrap();
    let again = e.submit(A, Payload::from_u32(5)).unwrap();
    assert!(again.is_some());
}

#[test]
fn ties_keep_current_head() {
    let mut e = entry(Some(ArbitrationType::LessThan), Limits::default());
    e.submit(A, Payload::from_u32(3)).unwrap();
    assert_eq!(e.submit(B, Payload::from_u32(3)).unwrap(), None);
    assert_eq!(e.winner().map(|w| w.app), Some(A));
}

#[test]
fn inverted_limits_are_rejected() {
    let mut e = entry(Some(ArbitrationType::GreaterThan), Limits::new(50, 10).unwrap());
    e.submit(A, Payload::from_u32(40)).unwrap();

    assert_eq!(e.set_limits(Some(10), Some(20)), Err(ArbError::OutOfBounds));
    assert_eq!(e.limits(), Limits { upper: 50, lower: 10 });
    assert_eq!(winner(&e), Some(40));
}

#[test]
fn set_limits_reclamps_winner_only_on_change() {
    let mut e = entry(Some(ArbitrationType::GreaterThan), Limits::default());
    e.submit(A, Payload::from_u32(400)).unwrap();

    let c = e.set_limits(Some(300), None).unwrap().expect("bounds changed");
    assert_eq!(c.payload.as_u32(), Some(300));
    assert!(!c.requires_delay);

    assert_eq!(e.set_limits(Some(300), None).unwrap(), None);
    // Lower alone: upper retained.
    e.set_limits(None, Some(100)).unwrap();
    assert_eq!(e.limits(), Limits { upper: 300, lower: 100 });
}

#[test]
fn set_limits_without_winner_queues_nothing() {
    let mut e = entry(None, Limits::default());
    assert_eq!(e.set_limits(Some(10), Some(5)).unwrap(), None);
}

#[test]
fn switching_comparator_rearbitrates() {
    let mut e = entry(Some(ArbitrationType::GreaterThan), Limits::default());
    e.submit(A, Payload::from_u32(5)).unwrap();
    e.submit(B, Payload::from_u32(9)).unwrap();
    assert_eq!(e.winner().map(|w| w.app), Some(B));

    let c = e.set_arbitration_type(ArbitrationType::LessThan).expect("winner changed");
    assert_eq!(c.payload.as_u32(), Some(5));
    assert_eq!(e.winner().map(|w| w.app), Some(A));

    // Same comparator again: the head keeps its identity.
    assert_eq!(e.set_arbitration_type(ArbitrationType::LessThan), None);
}

#[test]
fn unknown_comparator_id_is_rejected() {
    assert_eq!(ArbitrationType::try_from(0), Err(ArbError::OutOfBounds));
    assert_eq!(ArbitrationType::try_from(3), Err(ArbError::OutOfBounds));
    assert_eq!(ArbitrationType::try_from(2), Ok(ArbitrationType::LessThan));
}

#[test]
fn removing_winner_promotes_next_best() {
    let mut e = entry(Some(ArbitrationType::GreaterThan), Limits::default());
    e.submit(A, Payload::from_u32(5)).unwrap();
    e.submit(B, Payload::from_u32(9)).unwrap();

    let c = e.remove_app(B).expect("winner changed");
    assert_eq!(c.payload.as_u32(), Some(5));

    // Removing a non-winner or an unknown app changes nothing.
    e.submit(C, Payload::from_u32(1)).unwrap();
    assert_eq!(e.remove_app(C), None);
    assert_eq!(e.remove_app(AppHandle(0xFF)), None);

    // Last one out empties the entry without a corrective job.
    assert_eq!(e.remove_app(A), None);
    assert!(e.requests().is_empty());
}

#[test]
fn disable_purges_and_reenable_starts_empty() {
    let mut e = entry(Some(ArbitrationType::GreaterThan), Limits::default());
    e.submit(A, Payload::from_u32(5)).unwrap();
    e.set_enabled(false);
    assert!(e.requests().is_empty());
    assert_eq!(e.submit(B, Payload::from_u32(1)), Err(ArbError::NotSupported));

    e.set_enabled(true);
    assert!(e.requests().is_empty());
    assert!(e.submit(B, Payload::from_u32(1)).unwrap().is_some());
}

#[test]
fn short_payload_ranks_last_and_empty_is_rejected() {
    let mut e = entry(Some(ArbitrationType::LessThan), Limits::default());
    e.submit(A, Payload::new(vec![1u8, 2])).unwrap();
    assert_eq!(e.winner().map(|w| w.app), Some(A));

    // Any valid request beats an invalid head.
    e.submit(B, Payload::from_u32(u32::MAX)).unwrap();
    assert_eq!(e.winner().map(|w| w.app), Some(B));

    assert_eq!(e.submit(C, Payload::empty()), Err(ArbError::ParameterNull));
}

#[test]
fn entry_without_comparator_keeps_arrival_order() {
    let mut e = entry(None, Limits::default());
    e.submit(A, Payload::from_u32(1)).unwrap();
    e.submit(B, Payload::from_u32(100)).unwrap();
    assert_eq!(e.winner().map(|w| w.app), Some(A));

    e.set_arbitration_type(ArbitrationType::GreaterThan).expect("winner changed");
    assert_eq!(e.winner().map(|w| w.app), Some(B));
}

// Tie-breaking after the head leaves: the first still-held request in list order wins,
// which is the earlier submitter among equals.
#[test]
fn tie_after_winner_removal_uses_list_order() {
    let mut e = entry(Some(ArbitrationType::GreaterThan), Limits::default());
    e.submit(A, Payload::from_u32(9)).unwrap();
    e.submit(B, Payload::from_u32(5)).unwrap();
    e.submit(C, Payload::from_u32(5)).unwrap();

    e.remove_app(A);
    assert_eq!(e.winner().map(|w| w.app), Some(B));
}

#[test]
fn clamping_leaves_unreadable_payload_alone() {
    let l = Limits::new(10, 5).unwrap();
    assert_eq!(l.clamp_payload(&Payload::from_u32(50)).as_u32(), Some(10));
    assert_eq!(l.clamp_payload(&Payload::from_u32(1)).as_u32(), Some(5));
    let short = Payload::new(vec![9u8]);
    assert_eq!(l.clamp_payload(&short), short);
}

#[test]
fn domain_qualifiers() {
    assert_eq!(Domain::from_qualifier("D0"), Some(Domain::D0));
    assert_eq!(Domain::from_qualifier("d1"), Some(Domain::D1));
    assert_eq!(Domain::D0.0, 0x3044);
    assert_eq!(Domain::from_qualifier("D"), None);
    assert_eq!(Domain::D2.to_string(), "D2");
}

#[test]
fn cfg_defaults_and_partial_json() {
    let cfg: ArbiterCfg = serde_json::from_str(r#"{ "entry_growth": 4, "populate_defaults": false }"#).unwrap();
    assert_eq!(cfg.entry_growth, 4);
    assert!(!cfg.populate_defaults);
    assert!(cfg.arbitration_enabled);
    assert_eq!(cfg.default_tables, DefaultTables::default());

    let tables = DefaultTables::default();
    assert_eq!(tables.for_class(ParticipantClass::Fan).len(), 1);
    assert!(tables.for_class(ParticipantClass::Primary).is_empty());
    assert!(tables.for_class(ParticipantClass::Other).is_empty());
    assert!(tables
        .for_class(ParticipantClass::Cpu)
        .iter()
        .any(|r| r.primitive == "SET_PERF_PREFERENCE_MAX" && r.limits == Limits::percent()));
}

proptest! {
    #[test]
    fn greater_than_winner_is_clamped_max(
        submissions in prop::collection::vec((0u64..6, any::<u32>()), 1..40),
        lo in 0u32..1000,
        span in 0u32..100_000,
    ) {
        let limits = Limits::new(lo + span, lo).unwrap();
        let mut e = entry(Some(ArbitrationType::GreaterThan), limits);
        let mut held = std::collections::HashMap::new();

        for (app, value) in submissions {
            e.submit(AppHandle(app), Payload::from_u32(value)).unwrap();
            held.insert(app, value);

            let max = *held.values().max().unwrap();
            prop_assert_eq!(winner(&e), Some(max));
            prop_assert_eq!(e.arbitrated_value().and_then(|p| p.as_u32()), Some(limits.clamp(max)));
            prop_assert_eq!(e.requests().len(), held.len());
        }
    }
}
