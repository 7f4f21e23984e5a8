//! Builder lifecycle: ended listeners, open-child slots and builder states.
//!
//! A parent that opens a child builder records the child's id in the slot for
//! that kind of child and hands the child a listener. When the child ends it calls
//! [`BuilderEndedListener::on_builder_ended`] with its result; the listener folds
//! the result into the parent, clears the slot and produces the value the fluent
//! chain continues with.

use super::cte::CteDefinition;
use super::model::QueryNode;
use crate::error::{
    builder_already_ended, builder_not_ended, previous_builder_not_ended, CriteriaError, Result,
};
use crate::expression::{CompoundPredicate, Expression, Predicate};
use std::cell::RefCell;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuilderId(u64);

impl BuilderId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for BuilderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callback a parent hands to a child builder. `R` is what the child produces,
/// `T` is what the fluent chain continues with after the child ended.
pub trait BuilderEndedListener<R, T> {
    fn on_builder_ended(&self, builder: BuilderId, result: R) -> Result<T>;
}

pub type PredicateBuilderEndedListener<T> = dyn BuilderEndedListener<Predicate, T>;
pub type SubqueryBuilderListener<T> = dyn BuilderEndedListener<QueryNode, T>;
pub type ExpressionBuilderEndedListener<T> = dyn BuilderEndedListener<Expression, T>;
pub type JoinOnBuilderListener<T> = dyn BuilderEndedListener<CompoundPredicate, T>;
pub type CteBuilderListener<T> = dyn BuilderEndedListener<CteDefinition, T>;

type Callback<R, T> = Box<dyn FnOnce(BuilderId, R) -> Result<T>>;

/// Listener backed by a one-shot closure; a second notification is a chaining error.
pub(crate) struct Continuation<R, T> {
    callback: RefCell<Option<Callback<R, T>>>,
}

impl<R, T> BuilderEndedListener<R, T> for Continuation<R, T> {
    fn on_builder_ended(&self, builder: BuilderId, result: R) -> Result<T> {
        let callback = self
            .callback
            .borrow_mut()
            .take()
            .ok_or_else(|| builder_already_ended("listener"))?;
        callback(builder, result)
    }
}

pub(crate) fn listener<R: 'static, T: 'static>(
    callback: impl FnOnce(BuilderId, R) -> Result<T> + 'static,
) -> Box<dyn BuilderEndedListener<R, T>> {
    Box::new(Continuation {
        callback: RefCell::new(Some(Box::new(callback))),
    })
}

/// Kinds of children a builder can have open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilderSlot {
    Restriction,
    LeftSubquery,
    RightSubquery,
    SuperExpressionSubquery,
    CaseExpression,
    MultipleSubquery,
    NestedPredicate,
    SelectSubquery,
    JoinOn,
    Cte,
}

impl BuilderSlot {
    const ALL: [BuilderSlot; 10] = [
        BuilderSlot::Restriction,
        BuilderSlot::LeftSubquery,
        BuilderSlot::RightSubquery,
        BuilderSlot::SuperExpressionSubquery,
        BuilderSlot::CaseExpression,
        BuilderSlot::MultipleSubquery,
        BuilderSlot::NestedPredicate,
        BuilderSlot::SelectSubquery,
        BuilderSlot::JoinOn,
        BuilderSlot::Cte,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// One nullable slot per child kind; at most one child is open at a time.
#[derive(Debug, Clone, Default)]
pub struct OpenBuilders {
    slots: [Option<BuilderId>; 10],
}

impl OpenBuilders {
    pub fn open(&mut self, slot: BuilderSlot, id: BuilderId) -> Result<()> {
        if self.any_open() {
            return Err(previous_builder_not_ended());
        }
        self.slots[slot.index()] = Some(id);
        Ok(())
    }

    pub fn close(&mut self, slot: BuilderSlot, id: BuilderId) -> Result<()> {
        match self.slots[slot.index()] {
            Some(open) if open == id => {
                self.slots[slot.index()] = None;
                Ok(())
            }
            Some(open) => Err(CriteriaError::BuilderChaining(format!(
                "Builder {id} ended while builder {open} is the open {slot:?} builder"
            ))),
            None => Err(CriteriaError::BuilderChaining(format!(
                "Builder {id} ended but no {slot:?} builder is open"
            ))),
        }
    }

    pub fn is_open(&self, slot: BuilderSlot) -> bool {
        self.slots[slot.index()].is_some()
    }

    pub fn any_open(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }

    pub fn open_slots(&self) -> Vec<BuilderSlot> {
        BuilderSlot::ALL
            .into_iter()
            .filter(|slot| self.is_open(*slot))
            .collect()
    }

    pub fn verify_ended(&self) -> Result<()> {
        if self.any_open() {
            Err(builder_not_ended())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuilderState {
    #[default]
    Open,
    Ended,
}

impl BuilderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuilderState::Ended)
    }
}

impl fmt::Display for BuilderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderState::Open => write!(f, "open"),
            BuilderState::Ended => write!(f, "ended"),
        }
    }
}

/// States of an operand in a set-operation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SetOperationState {
    #[default]
    Open,
    SetOperationEnded,
}

impl SetOperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SetOperationState::SetOperationEnded)
    }
}

impl fmt::Display for SetOperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetOperationState::Open => write!(f, "open"),
            SetOperationState::SetOperationEnded => write!(f, "set_operation_ended"),
        }
    }
}
