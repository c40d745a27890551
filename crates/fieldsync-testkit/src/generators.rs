//! Proptest generators for property-based testing.

use proptest::prelude::*;

use fieldsync_core::{
    ConflictCase, ConflictStrategy, EntityKey, EntityVersion, ManualChoice, NewMutation,
    Operation, QueueItemId,
};

/// Generate an entity key from the field-service entity types.
pub fn entity_key() -> impl Strategy<Value = EntityKey> {
    (
        prop_oneof![Just("Asset"), Just("Job"), Just("Photo"), Just("Note")],
        0u32..64,
    )
        .prop_map(|(entity_type, id)| EntityKey::new(entity_type, id.to_string()))
}

/// Generate an Operation.
pub fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Create),
        Just(Operation::Update),
        Just(Operation::Delete),
        Just(Operation::Upload),
    ]
}

/// Generate a ConflictStrategy.
pub fn conflict_strategy() -> impl Strategy<Value = ConflictStrategy> {
    prop_oneof![
        Just(ConflictStrategy::ServerWins),
        Just(ConflictStrategy::ClientWins),
        Just(ConflictStrategy::LastWriteWins),
        Just(ConflictStrategy::Manual),
    ]
}

pub fn manual_choice() -> impl Strategy<Value = ManualChoice> {
    prop_oneof![Just(ManualChoice::KeepLocal), Just(ManualChoice::KeepRemote)]
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a reasonable timestamp (Unix ms).
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=1_800_000_000_000i64
}

/// Generate an entity version.
pub fn entity_version() -> impl Strategy<Value = EntityVersion> {
    (operation(), payload(256), timestamp())
        .prop_map(|(operation, payload, ts)| EntityVersion::new(operation, payload, ts))
}

/// Generate a mutation to enqueue.
pub fn new_mutation() -> impl Strategy<Value = NewMutation> {
    (entity_key(), operation(), payload(256), timestamp()).prop_map(
        |(entity, operation, payload, ts)| NewMutation::new(entity, operation, payload).at(ts),
    )
}

/// Generate a sequence of mutations.
pub fn mutations(max_len: usize) -> impl Strategy<Value = Vec<NewMutation>> {
    prop::collection::vec(new_mutation(), 0..=max_len)
}

/// Parameters for generating a conflict case.
#[derive(Debug, Clone)]
pub struct ConflictParams {
    pub entity: EntityKey,
    pub local_items: Vec<i64>,
    pub local: EntityVersion,
    pub remote: EntityVersion,
}

impl Arbitrary for ConflictParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            entity_key(),
            prop::collection::vec(1i64..=10_000, 1..=4),
            entity_version(),
            entity_version(),
        )
            .prop_map(|(entity, mut local_items, local, remote)| {
                local_items.sort_unstable();
                local_items.dedup();
                ConflictParams {
                    entity,
                    local_items,
                    local,
                    remote,
                }
            })
            .boxed()
    }
}

/// Build a conflict case from parameters.
pub fn case_from_params(params: &ConflictParams) -> ConflictCase {
    ConflictCase::new(
        params.entity.clone(),
        params.local_items.iter().copied().map(QueueItemId::new).collect(),
        params.local.clone(),
        params.remote.clone(),
    )
}
