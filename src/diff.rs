//! Structural tree diff engine
//!
//! Compares two snapshots of the dApp tree and produces a [`Changelog`]: one
//! [`Change`] per app whose own fields differ, each carrying the field-level
//! [`Difference`]s. Every difference is tagged with a [`Kind`] bitmask (what
//! changed) and an [`Operation`] bitmask (how it changed).
//!
//! Apps that exist on only one side are reported once, at their parent, as a
//! whole-value difference (`"{...}"`); the engine does not descend into them.
//! Apps present on both sides are compared recursively.
//!
//! All maps are walked in sorted key order, so changelog order is
//! deterministic: parent before children, siblings by name.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::meta::{Alias, App, Boundary, Channel, Metadata, Node, Type};
use crate::scope::{self, ROOT_CONTEXT};

/// Wire sentinel for an absent value
pub const NIL: &str = "<nil>";
/// Wire sentinel for a whole structural value that appeared or disappeared
pub const WHOLE: &str = "{...}";

macro_rules! flag_set {
    (
        $(#[$doc:meta])*
        $name:ident { $($(#[$fdoc:meta])* $flag:ident = $bit:expr),+ $(,)? }
    ) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            $($(#[$fdoc])* pub const $flag: $name = $name(1 << $bit);)+

            /// No bit set
            pub const NONE: $name = $name(0);

            const NAMES: &'static [(&'static str, $name)] = &[$((stringify!($flag), $name::$flag)),+];

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn from_bits(bits: u32) -> Self {
                $name(bits)
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// True if every bit of `other` is set in `self`
            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            /// True if `self` and `other` share at least one bit
            pub const fn intersects(self, other: $name) -> bool {
                self.0 & other.0 != 0
            }
        }

        impl BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = $name;
            fn bitand(self, rhs: $name) -> $name {
                $name(self.0 & rhs.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_empty() {
                    return f.write_str("NONE");
                }
                let mut first = true;
                for (label, flag) in Self::NAMES {
                    if self.contains(*flag) {
                        if !first {
                            f.write_str(" | ")?;
                        }
                        f.write_str(label)?;
                        first = false;
                    }
                }
                Ok(())
            }
        }
    };
}

flag_set! {
    /// What a difference touches. Bits combine, e.g. `META | CHANNEL` for a
    /// channel's metadata field.
    Kind {
        APP = 0,
        NODE = 1,
        META = 2,
        CHANNEL = 3,
        TYPE = 4,
        BOUNDARY = 5,
        FIELD = 6,
        ANNOTATION = 7,
        ALIAS = 8,
        ENVIRONMENT = 9,
    }
}

flag_set! {
    /// How a value changed
    Operation {
        DELETE = 0,
        UPDATE = 1,
        CREATE = 2,
    }
}

/// One side of a [`Difference`]
///
/// On the wire every variant is a plain string. A `Text` equal to `"<nil>"`
/// or `"{...}"` serializes exactly like `Absent` or `Whole` and reads back
/// as those; the two cannot be told apart after a round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffValue {
    /// No value on this side (`"<nil>"` on the wire)
    Absent,
    /// A whole structure, not enumerated (`"{...}"` on the wire)
    Whole,
    /// Stringified scalar
    Text(String),
}

impl DiffValue {
    pub fn text(value: impl Into<String>) -> Self {
        DiffValue::Text(value.into())
    }

    fn from_option(value: Option<&String>) -> Self {
        value.map_or(DiffValue::Absent, |v| DiffValue::Text(v.clone()))
    }

    /// Wire form of the value
    pub fn as_wire(&self) -> &str {
        match self {
            DiffValue::Absent => NIL,
            DiffValue::Whole => WHOLE,
            DiffValue::Text(s) => s,
        }
    }

    pub fn from_wire(s: &str) -> Self {
        match s {
            NIL => DiffValue::Absent,
            WHOLE => DiffValue::Whole,
            other => DiffValue::text(other),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, DiffValue::Absent)
    }
}

impl fmt::Display for DiffValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl PartialEq<&str> for DiffValue {
    fn eq(&self, other: &&str) -> bool {
        self.as_wire() == *other
    }
}

impl Serialize for DiffValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for DiffValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(DiffValue::from_wire(&s))
    }
}

/// A single field-level change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Difference {
    /// Dotted path of the field, for display only
    pub field: String,
    pub from: DiffValue,
    pub to: DiffValue,
    #[serde(rename = "Kind")]
    pub kind: Kind,
    /// Name of the entry the difference is about (child app, channel, key...)
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Operation")]
    pub operation: Operation,
}

/// All differences found on one app of the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Changelog context of the app (`"*"` for the root, `"*.a.b"` below it)
    pub context: String,
    pub diff: Vec<Difference>,
    /// OR of every contained difference's kind
    #[serde(rename = "Kind")]
    pub kind: Kind,
    /// OR of every contained difference's operation
    #[serde(rename = "Operation")]
    pub operation: Operation,
}

impl Change {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            ..Self::default()
        }
    }

    /// Append a difference, folding its flags into the change
    pub fn push(&mut self, d: Difference) {
        self.kind |= d.kind;
        self.operation |= d.operation;
        self.diff.push(d);
    }

    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }

    /// Store scope of the changed app
    pub fn scope(&self) -> &str {
        scope::context_to_scope(&self.context)
    }
}

/// Ordered list of changes between two trees
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Changelog(Vec<Change>);

impl Changelog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.0.push(change);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.0.iter()
    }

    pub fn changes(&self) -> &[Change] {
        &self.0
    }

    /// Change recorded for `context`, if any
    pub fn get(&self, context: &str) -> Option<&Change> {
        self.0.iter().find(|c| c.context == context)
    }

    /// Total number of differences over all changes
    pub fn difference_count(&self) -> usize {
        self.0.iter().map(|c| c.diff.len()).sum()
    }
}

impl From<Vec<Change>> for Changelog {
    fn from(changes: Vec<Change>) -> Self {
        Changelog(changes)
    }
}

impl<'a> IntoIterator for &'a Changelog {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Changelog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in &self.0 {
            writeln!(f, "On: {}", change.context)?;
            let wf = change
                .diff
                .iter()
                .map(|d| d.field.len())
                .fold("Field".len(), usize::max);
            let wfrom = change
                .diff
                .iter()
                .map(|d| d.from.as_wire().len())
                .fold("From".len(), usize::max);
            writeln!(f, "{:<wf$} | {:<wfrom$} | To", "Field", "From")?;
            for d in &change.diff {
                writeln!(f, "{:<wf$} | {:<wfrom$} | {}", d.field, d.from, d.to)?;
            }
        }
        Ok(())
    }
}

/// Identity invariant violated while diffing: a name or parent changed on an
/// entity that both snapshots hold at the same position.
///
/// `partial` holds every change recorded up to and including the offending
/// node, so the result stays usable for diagnostics.
#[derive(Debug, Error)]
#[error("on {context}: {field} must not change ({from} -> {to})")]
pub struct DiffError {
    pub context: String,
    pub field: String,
    pub from: String,
    pub to: String,
    pub partial: Changelog,
}

struct Violation {
    field: String,
    from: String,
    to: String,
}

type Step = Result<(), Violation>;

/// Compare two snapshots of the same tree position and return the changelog.
///
/// The root call uses the context `"*"`; children extend it with `.<name>`.
pub fn diff(origin: &App, current: &App) -> Result<Changelog, DiffError> {
    let mut log = Changelog::new();
    match diff_app(origin, current, ROOT_CONTEXT, &mut log) {
        Ok(()) => Ok(log),
        Err((context, v)) => Err(DiffError {
            context,
            field: v.field,
            from: v.from,
            to: v.to,
            partial: log,
        }),
    }
}

fn diff_app(
    origin: &App,
    current: &App,
    ctx: &str,
    log: &mut Changelog,
) -> Result<(), (String, Violation)> {
    let mut change = Change::new(ctx);
    let step = diff_app_fields(&mut change, origin, current);
    if !change.is_empty() {
        log.push(change);
    }
    step.map_err(|v| (String::from(ctx), v))?;

    // Only apps present on both sides are expanded
    for (name, from_child) in &origin.spec.apps {
        if let Some(to_child) = current.spec.apps.get(name) {
            diff_app(from_child, to_child, &format!("{ctx}.{name}"), log)?;
        }
    }
    Ok(())
}

fn diff_app_fields(change: &mut Change, origin: &App, current: &App) -> Step {
    diff_metadata(change, &origin.meta.name, Kind::APP, &origin.meta, &current.meta, "")?;
    diff_node(change, &origin.spec.node, &current.spec.node)?;
    diff_apps(change, &origin.spec.apps, &current.spec.apps);
    diff_channels(change, &origin.spec.channels, &current.spec.channels)?;
    diff_types(change, &origin.spec.types, &current.spec.types)?;
    diff_aliases(change, &origin.spec.aliases, &current.spec.aliases);
    diff_boundary(change, &origin.spec.boundary, &current.spec.boundary);
    Ok(())
}

/// Sorted union of the keys of two maps, with the value on each side
fn paired<'a, V>(
    from: &'a BTreeMap<String, V>,
    to: &'a BTreeMap<String, V>,
) -> impl Iterator<Item = (&'a str, Option<&'a V>, Option<&'a V>)> + 'a {
    let keys: BTreeSet<&'a str> = from.keys().chain(to.keys()).map(String::as_str).collect();
    keys.into_iter().map(move |k| (k, from.get(k), to.get(k)))
}

/// Existence difference for a one-sided entry, `None` if present on both sides
fn existence<V>(from: Option<&V>, to: Option<&V>) -> Option<(DiffValue, DiffValue, Operation)> {
    match (from, to) {
        (Some(_), None) => Some((DiffValue::Whole, DiffValue::Absent, Operation::DELETE)),
        (None, Some(_)) => Some((DiffValue::Absent, DiffValue::Whole, Operation::CREATE)),
        _ => None,
    }
}

fn diff_metadata(
    change: &mut Change,
    element: &str,
    parent_kind: Kind,
    from: &Metadata,
    to: &Metadata,
    prefix: &str,
) -> Step {
    let kind = Kind::META | parent_kind;
    let mut violation = None;

    let fields: [(&str, &str, &str, bool); 4] = [
        ("Meta.Name", &from.name, &to.name, true),
        ("Meta.Reference", &from.reference, &to.reference, false),
        ("Meta.Parent", &from.parent, &to.parent, true),
        ("Meta.SHA256", &from.sha256, &to.sha256, false),
    ];
    for (field, a, b, identity) in fields {
        if a == b {
            continue;
        }
        let field = format!("{prefix}{field}");
        // an empty side means the entity is being introduced, not renamed
        if identity && violation.is_none() && !a.is_empty() && !b.is_empty() {
            violation = Some(Violation {
                field: field.clone(),
                from: String::from(a),
                to: String::from(b),
            });
        }
        change.push(Difference {
            field,
            from: DiffValue::text(a),
            to: DiffValue::text(b),
            kind,
            name: String::from(element),
            operation: Operation::UPDATE,
        });
    }

    diff_string_map(
        change,
        &from.annotations,
        &to.annotations,
        &format!("{prefix}Meta.Annotations"),
        kind | Kind::ANNOTATION,
    );

    violation.map_or(Ok(()), Err)
}

fn diff_string_map(
    change: &mut Change,
    from: &BTreeMap<String, String>,
    to: &BTreeMap<String, String>,
    field: &str,
    kind: Kind,
) {
    for (key, a, b) in paired(from, to) {
        let operation = match (a, b) {
            (Some(x), Some(y)) if x == y => continue,
            (Some(_), Some(_)) => Operation::UPDATE,
            (Some(_), None) => Operation::DELETE,
            (None, Some(_)) => Operation::CREATE,
            (None, None) => continue,
        };
        change.push(Difference {
            field: format!("{field}[{key}]"),
            from: DiffValue::from_option(a),
            to: DiffValue::from_option(b),
            kind,
            name: String::from(key),
            operation,
        });
    }
}

fn diff_node(change: &mut Change, from: &Node, to: &Node) -> Step {
    let element = if from.meta.name.is_empty() { &to.meta.name } else { &from.meta.name };
    diff_metadata(change, element, Kind::NODE, &from.meta, &to.meta, "Spec.Node.")?;

    if from.spec.image != to.spec.image {
        change.push(Difference {
            field: String::from("Spec.Node.Spec.Image"),
            from: DiffValue::text(&from.spec.image),
            to: DiffValue::text(&to.spec.image),
            kind: Kind::NODE,
            name: String::new(),
            operation: Operation::UPDATE,
        });
    }

    if from.spec.replicas != to.spec.replicas {
        change.push(Difference {
            field: String::from("Spec.Node.Spec.Replicas"),
            from: DiffValue::text(from.spec.replicas.to_string()),
            to: DiffValue::text(to.spec.replicas.to_string()),
            kind: Kind::NODE,
            name: String::new(),
            operation: Operation::UPDATE,
        });
    }

    diff_string_map(
        change,
        &from.spec.environment,
        &to.spec.environment,
        "Spec.Node.Spec.Environment",
        Kind::ENVIRONMENT,
    );
    Ok(())
}

fn diff_apps(change: &mut Change, from: &BTreeMap<String, App>, to: &BTreeMap<String, App>) {
    for (key, a, b) in paired(from, to) {
        if let Some((from_v, to_v, operation)) = existence(a, b) {
            change.push(Difference {
                field: format!("Spec.Apps[{key}]"),
                from: from_v,
                to: to_v,
                kind: Kind::APP,
                name: String::from(key),
                operation,
            });
        }
    }
}

fn diff_channels(
    change: &mut Change,
    from: &BTreeMap<String, Channel>,
    to: &BTreeMap<String, Channel>,
) -> Step {
    for (key, a, b) in paired(from, to) {
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            (a, b) => {
                if let Some((from_v, to_v, operation)) = existence(a, b) {
                    change.push(Difference {
                        field: format!("Spec.Channels[{key}]"),
                        from: from_v,
                        to: to_v,
                        kind: Kind::CHANNEL,
                        name: String::from(key),
                        operation,
                    });
                }
                continue;
            }
        };

        if a.spec.type_name != b.spec.type_name {
            change.push(Difference {
                field: format!("Spec.Channels[{key}].Spec.Type"),
                from: DiffValue::text(&a.spec.type_name),
                to: DiffValue::text(&b.spec.type_name),
                kind: Kind::CHANNEL,
                name: String::from(key),
                operation: Operation::UPDATE,
            });
        }
        diff_metadata(change, key, Kind::CHANNEL, &a.meta, &b.meta, &format!("Spec.Channels[{key}]."))?;
    }
    Ok(())
}

fn diff_types(change: &mut Change, from: &BTreeMap<String, Type>, to: &BTreeMap<String, Type>) -> Step {
    for (key, a, b) in paired(from, to) {
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            (a, b) => {
                if let Some((from_v, to_v, operation)) = existence(a, b) {
                    change.push(Difference {
                        field: format!("Spec.Types[{key}]"),
                        from: from_v,
                        to: to_v,
                        kind: Kind::TYPE,
                        name: String::from(key),
                        operation,
                    });
                }
                continue;
            }
        };

        if a.schema != b.schema {
            change.push(Difference {
                field: format!("Spec.Types[{key}].Schema"),
                from: DiffValue::text(&a.schema),
                to: DiffValue::text(&b.schema),
                kind: Kind::TYPE,
                name: String::from(key),
                operation: Operation::UPDATE,
            });
        }
        diff_metadata(change, key, Kind::TYPE, &a.meta, &b.meta, &format!("Spec.Types[{key}]."))?;
    }
    Ok(())
}

fn diff_aliases(change: &mut Change, from: &BTreeMap<String, Alias>, to: &BTreeMap<String, Alias>) {
    for (key, a, b) in paired(from, to) {
        let (from_v, to_v, operation) = match (a, b) {
            (Some(a), Some(b)) if a.target == b.target => continue,
            (Some(a), Some(b)) => (
                DiffValue::text(&a.target),
                DiffValue::text(&b.target),
                Operation::UPDATE,
            ),
            (Some(a), None) => (DiffValue::text(&a.target), DiffValue::Absent, Operation::DELETE),
            (None, Some(b)) => (DiffValue::Absent, DiffValue::text(&b.target), Operation::CREATE),
            (None, None) => continue,
        };
        change.push(Difference {
            field: format!("Spec.Aliases[{key}]"),
            from: from_v,
            to: to_v,
            kind: Kind::ALIAS,
            name: String::from(key),
            operation,
        });
    }
}

fn diff_boundary(change: &mut Change, from: &Boundary, to: &Boundary) {
    let sides = [
        ("Spec.Boundary.Input", &from.input, &to.input),
        ("Spec.Boundary.Output", &from.output, &to.output),
    ];
    for (field, a, b) in sides {
        let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
        let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
        for name in a.symmetric_difference(&b) {
            let (from_v, to_v, operation) = if a.contains(name) {
                (DiffValue::text(*name), DiffValue::Absent, Operation::DELETE)
            } else {
                (DiffValue::Absent, DiffValue::text(*name), Operation::CREATE)
            };
            change.push(Difference {
                field: String::from(field),
                from: from_v,
                to: to_v,
                kind: Kind::BOUNDARY,
                name: String::from(*name),
                operation,
            });
        }
    }
}
