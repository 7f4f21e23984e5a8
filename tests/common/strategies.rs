use fluent_criteria::prelude::SetOperationType;
use proptest::prelude::*;

/// Ages used as restriction values.
pub fn age_strategy() -> impl Strategy<Value = i64> {
    0i64..120
}

/// Between one and six restriction values, in insertion order.
pub fn ages_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(age_strategy(), 1..6)
}

/// Lower-case names that cannot collide with parser keywords.
pub fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,12}".prop_map(|name| format!("n_{name}"))
}

pub fn set_operation_strategy() -> impl Strategy<Value = SetOperationType> {
    prop_oneof![
        Just(SetOperationType::Union),
        Just(SetOperationType::UnionAll),
        Just(SetOperationType::Intersect),
        Just(SetOperationType::IntersectAll),
        Just(SetOperationType::Except),
        Just(SetOperationType::ExceptAll),
    ]
}

