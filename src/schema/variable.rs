//! Physical variables, components and the keys that identify fetched streams.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A stream that can be fetched from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    /// Elapsed simulated time (scalar parameter, one value per frame).
    Time,
    /// Magnetic field.
    B,
    /// Proton bulk velocity.
    V,
    /// Current density.
    J,
    /// Proton number density.
    Rho,
}

impl Field {
    /// Name of the variable (or parameter) inside a snapshot file.
    pub fn reader_name(self) -> &'static str {
        match self {
            Field::Time => "time",
            Field::B => "vg_b_vol",
            Field::V => "proton/vg_v",
            Field::J => "vg_j",
            Field::Rho => "proton/vg_rho",
        }
    }

    /// Short name used in configs, file names and titles.
    pub fn short_name(self) -> &'static str {
        match self {
            Field::Time => "time",
            Field::B => "B",
            Field::V => "v",
            Field::J => "J",
            Field::Rho => "rho",
        }
    }

    /// Divisor converting SI values into display units.
    pub fn unit_scale(self) -> f64 {
        match self {
            Field::Time => 1.0,
            Field::B => 1e-9,
            Field::V => 1e3,
            Field::J => 1e-9,
            Field::Rho => 1e6,
        }
    }

    /// Display unit label.
    pub fn unit_name(self) -> &'static str {
        match self {
            Field::Time => "s",
            Field::B => "nT",
            Field::V => "km/s",
            Field::J => "nA/m^2",
            Field::Rho => "1/m^3",
        }
    }

    /// True for three-component fields.
    pub fn is_vector(self) -> bool {
        matches!(self, Field::B | Field::V | Field::J)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Variable named by an animation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Variable {
    /// A directly fetchable field (never `Field::Time`).
    Field(Field),
    /// Composite velocity/magnetic-field diagnostic (cross helicity, residual energy).
    Residual,
}

impl Variable {
    /// Parse a config spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "B" => Some(Variable::Field(Field::B)),
            "v" => Some(Variable::Field(Field::V)),
            "J" => Some(Variable::Field(Field::J)),
            "rho" => Some(Variable::Field(Field::Rho)),
            "bv" | "residual" => Some(Variable::Residual),
            _ => None,
        }
    }

    /// Short name used in file names and titles.
    pub fn short_name(self) -> &'static str {
        match self {
            Variable::Field(field) => field.short_name(),
            Variable::Residual => "residual",
        }
    }

    /// The underlying field, if this is not a composite.
    pub fn field(self) -> Option<Field> {
        match self {
            Variable::Field(field) => Some(field),
            Variable::Residual => None,
        }
    }

    /// True if the variable is a three-component field.
    pub fn is_vector(self) -> bool {
        self.field().is_some_and(Field::is_vector)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Component selector of a fetched stream (the reader's operator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Component {
    X,
    Y,
    Z,
    Magnitude,
    /// Scalar read, no component.
    Pass,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Component::X => "x",
            Component::Y => "y",
            Component::Z => "z",
            Component::Magnitude => "magnitude",
            Component::Pass => "pass",
        }
    }

    /// Index into a three-component vector, for `X`/`Y`/`Z`.
    pub fn axis_index(self) -> Option<usize> {
        match self {
            Component::X => Some(0),
            Component::Y => Some(1),
            Component::Z => Some(2),
            Component::Magnitude | Component::Pass => None,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component as displayed by a request. Wider than [`Component`] because
/// `Perpendicular` is assembled from two fetched components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DisplayComponent {
    X,
    Y,
    Z,
    Magnitude,
    Perpendicular,
    Pass,
}

impl DisplayComponent {
    /// Parse a config spelling. `"total"` is an alias of magnitude.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "x" => Some(DisplayComponent::X),
            "y" => Some(DisplayComponent::Y),
            "z" => Some(DisplayComponent::Z),
            "magnitude" | "total" => Some(DisplayComponent::Magnitude),
            "perp" | "perpendicular" => Some(DisplayComponent::Perpendicular),
            "pass" => Some(DisplayComponent::Pass),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DisplayComponent::X => "x",
            DisplayComponent::Y => "y",
            DisplayComponent::Z => "z",
            DisplayComponent::Magnitude => "magnitude",
            DisplayComponent::Perpendicular => "perp",
            DisplayComponent::Pass => "pass",
        }
    }

    /// The single fetched component this displays, if there is one.
    pub fn fetched(self) -> Option<Component> {
        match self {
            DisplayComponent::X => Some(Component::X),
            DisplayComponent::Y => Some(Component::Y),
            DisplayComponent::Z => Some(Component::Z),
            DisplayComponent::Magnitude => Some(Component::Magnitude),
            DisplayComponent::Pass => Some(Component::Pass),
            DisplayComponent::Perpendicular => None,
        }
    }
}

impl fmt::Display for DisplayComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one fetched buffer: at most one live buffer exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariableKey {
    pub field: Field,
    pub component: Component,
}

impl VariableKey {
    pub const TIME: VariableKey = VariableKey {
        field: Field::Time,
        component: Component::Pass,
    };

    pub const fn new(field: Field, component: Component) -> Self {
        Self { field, component }
    }

    /// How this key is read and stored.
    pub fn policy(self) -> FetchPolicy {
        FetchPolicy::for_key(self)
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.field, self.component)
    }
}

/// Per-key storage policy applied while fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// One scalar parameter per frame.
    Parameter,
    /// Cell values stored as read.
    Raw,
    /// Cell values minus the frame's own spatial mean.
    MeanCentered,
}

impl FetchPolicy {
    pub fn for_key(key: VariableKey) -> Self {
        match (key.field, key.component) {
            (Field::Time, _) => FetchPolicy::Parameter,
            (Field::Rho, _) | (_, Component::Magnitude) => FetchPolicy::Raw,
            _ => FetchPolicy::MeanCentered,
        }
    }
}
