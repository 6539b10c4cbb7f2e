//! Reaction dispatch over a changelog
//!
//! A reaction pairs a filter with an operation. Traversal visits every entry
//! of the changelog, runs the operation of every reaction whose filter
//! matches, and collects all operation errors into one [`MultiError`].
//! Nothing short-circuits: a failing reaction does not stop the others.
//!
//! Two granularities:
//! - [`DifferenceReaction`]: per `(context, Difference)` pair
//! - [`ChangeReaction`]: per [`Change`]

use crate::diff::{Change, Changelog, Difference, Kind};
use crate::error::{BoxError, MultiError};

/// Result of a single reaction operation
pub type ReactionResult = Result<(), BoxError>;

type DiffFilter<'a> = Box<dyn Fn(&str, &Difference) -> bool + 'a>;
type DiffOperation<'a> = Box<dyn Fn(&str, &Difference) -> ReactionResult + 'a>;
type ChangeFilter<'a> = Box<dyn Fn(&Change) -> bool + 'a>;
type ChangeOperation<'a> = Box<dyn Fn(&Change) -> ReactionResult + 'a>;

/// Filter + operation applied to individual differences.
///
/// Both closures receive the changelog context of the enclosing change
/// (`"*"`, `"*.a.b"`).
pub struct DifferenceReaction<'a> {
    filter: DiffFilter<'a>,
    operation: DiffOperation<'a>,
}

impl<'a> DifferenceReaction<'a> {
    pub fn new<F, O>(filter: F, operation: O) -> Self
    where
        F: Fn(&str, &Difference) -> bool + 'a,
        O: Fn(&str, &Difference) -> ReactionResult + 'a,
    {
        Self {
            filter: Box::new(filter),
            operation: Box::new(operation),
        }
    }

    /// Reaction matching any difference whose kind overlaps `kind`
    pub fn kind<O>(kind: Kind, operation: O) -> Self
    where
        O: Fn(&str, &Difference) -> ReactionResult + 'a,
    {
        Self::new(move |_, d: &Difference| d.kind.intersects(kind), operation)
    }

    pub fn matches(&self, context: &str, d: &Difference) -> bool {
        (self.filter)(context, d)
    }

    pub fn apply(&self, context: &str, d: &Difference) -> ReactionResult {
        (self.operation)(context, d)
    }
}

/// Filter + operation applied once per change
pub struct ChangeReaction<'a> {
    filter: ChangeFilter<'a>,
    operation: ChangeOperation<'a>,
}

impl<'a> ChangeReaction<'a> {
    pub fn new<F, O>(filter: F, operation: O) -> Self
    where
        F: Fn(&Change) -> bool + 'a,
        O: Fn(&Change) -> ReactionResult + 'a,
    {
        Self {
            filter: Box::new(filter),
            operation: Box::new(operation),
        }
    }

    /// Reaction matching any change whose aggregate kind overlaps `kind`
    pub fn kind<O>(kind: Kind, operation: O) -> Self
    where
        O: Fn(&Change) -> ReactionResult + 'a,
    {
        Self::new(move |c: &Change| c.kind.intersects(kind), operation)
    }

    pub fn matches(&self, change: &Change) -> bool {
        (self.filter)(change)
    }

    pub fn apply(&self, change: &Change) -> ReactionResult {
        (self.operation)(change)
    }
}

impl Changelog {
    /// Run every matching reaction on every difference.
    ///
    /// Returns every operation error; `Ok(())` if none failed.
    pub fn for_each_diff_filtered(&self, reactions: &[DifferenceReaction<'_>]) -> Result<(), MultiError> {
        let mut errs = MultiError::new();
        for change in self {
            for d in &change.diff {
                for reaction in reactions {
                    if reaction.matches(&change.context, d) {
                        errs.add_result(reaction.apply(&change.context, d));
                    }
                }
            }
        }
        errs.into_result()
    }

    /// Run every matching reaction once on every change
    pub fn for_each_filtered(&self, reactions: &[ChangeReaction<'_>]) -> Result<(), MultiError> {
        let mut errs = MultiError::new();
        for change in self {
            for reaction in reactions {
                if reaction.matches(change) {
                    errs.add_result(reaction.apply(change));
                }
            }
        }
        errs.into_result()
    }

    /// Narrowed copy keeping only differences accepted by `keep`.
    /// Changes left without differences are dropped.
    pub fn filter_diffs<F>(&self, keep: F) -> Changelog
    where
        F: Fn(&str, &Difference) -> bool,
    {
        self.iter()
            .map(|c| c.filter(|d| keep(&c.context, d)))
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .into()
    }

    /// Narrowed copy keeping only differences whose kind overlaps `kind`
    pub fn filter_diffs_by_kind(&self, kind: Kind) -> Changelog {
        self.filter_diffs(|_, d| d.kind.intersects(kind))
    }
}

impl Change {
    /// Copy of this change keeping only differences accepted by `keep`,
    /// with `kind` and `operation` recomputed from what is kept
    pub fn filter<F>(&self, keep: F) -> Change
    where
        F: Fn(&Difference) -> bool,
    {
        let mut out = Change::new(self.context.clone());
        for d in self.diff.iter().filter(|d| keep(d)) {
            out.push(d.clone());
        }
        out
    }

    pub fn filter_kind(&self, kind: Kind) -> Change {
        self.filter(|d| d.kind.intersects(kind))
    }
}
