//! Fixed discrete action set shared by every decision source and the training environment

use std::f32::consts::FRAC_1_SQRT_2;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::infra::Vec2;

/// Number of actions in the action space
pub const NUM_ACTIONS: usize = 18;

/// First id of the move-and-fire block
const FIRE_OFFSET: u8 = 8;
/// Hover in place and fire
pub const FIRE_ONLY: u8 = 16;
/// Hover in place, no fire
pub const NO_OP: u8 = 17;

/// The eight compass directions, clockwise from north
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn from_index(index: u8) -> Option<Direction> {
        Self::ALL.get(index as usize).copied()
    }

    /// Unit vector in screen space (y grows downward)
    pub fn unit_vector(&self) -> Vec2 {
        let d = FRAC_1_SQRT_2;
        match self {
            Direction::North => Vec2::new(0.0, -1.0),
            Direction::NorthEast => Vec2::new(d, -d),
            Direction::East => Vec2::new(1.0, 0.0),
            Direction::SouthEast => Vec2::new(d, d),
            Direction::South => Vec2::new(0.0, 1.0),
            Direction::SouthWest => Vec2::new(-d, d),
            Direction::West => Vec2::new(-1.0, 0.0),
            Direction::NorthWest => Vec2::new(-d, -d),
        }
    }

    /// Quantizes a vector to the nearest of the eight directions.
    /// Returns `None` for zero-length or non-finite vectors.
    pub fn from_vector(v: Vec2) -> Option<Direction> {
        let unit = v.normalized()?;
        // North sits at -90 degrees; each step clockwise adds 45
        let angle = unit.y.atan2(unit.x).to_degrees();
        let sector = ((angle + 90.0) / 45.0).round() as i32;
        Self::from_index(sector.rem_euclid(8) as u8)
    }
}

/// A member of the fixed action set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(u8);

impl ActionId {
    pub const NO_OP: ActionId = ActionId(NO_OP);
    pub const FIRE_ONLY: ActionId = ActionId(FIRE_ONLY);

    pub fn new(id: u8) -> Result<Self, ActionError> {
        if (id as usize) < NUM_ACTIONS {
            Ok(Self(id))
        } else {
            Err(ActionError::InvalidActionId {
                id: id as u32,
                count: NUM_ACTIONS as u32,
            })
        }
    }

    /// Build the action for an optional movement direction and fire flag
    pub fn from_parts(direction: Option<Direction>, fire: bool) -> Self {
        match (direction, fire) {
            (Some(dir), false) => Self(dir.index()),
            (Some(dir), true) => Self(dir.index() + FIRE_OFFSET),
            (None, true) => Self::FIRE_ONLY,
            (None, false) => Self::NO_OP,
        }
    }

    pub fn id(&self) -> u8 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn direction(&self) -> Option<Direction> {
        match self.0 {
            id if id < FIRE_OFFSET => Direction::from_index(id),
            id if id < FIRE_ONLY => Direction::from_index(id - FIRE_OFFSET),
            _ => None,
        }
    }

    pub fn fires(&self) -> bool {
        (FIRE_OFFSET..=FIRE_ONLY).contains(&self.0)
    }

    /// Same action with the fire flag set
    pub fn with_fire(&self) -> Self {
        Self::from_parts(self.direction(), true)
    }

    pub fn all() -> impl Iterator<Item = ActionId> {
        (0..NUM_ACTIONS as u8).map(ActionId)
    }
}

impl TryFrom<u8> for ActionId {
    type Error = ActionError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl TryFrom<usize> for ActionId {
    type Error = ActionError;

    fn try_from(id: usize) -> Result<Self, Self::Error> {
        match u8::try_from(id) {
            Ok(small) => Self::new(small),
            Err(_) => Err(ActionError::InvalidActionId {
                id: u32::try_from(id).unwrap_or(u32::MAX),
                count: NUM_ACTIONS as u32,
            }),
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.direction(), self.fires()) {
            (Some(dir), true) => write!(f, "{dir:?}+fire"),
            (Some(dir), false) => write!(f, "{dir:?}"),
            (None, true) => write!(f, "fire"),
            (None, false) => write!(f, "hover"),
        }
    }
}

/// Raw movement/fire intent decoded from an action
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intent {
    /// Unit vector, or zero when hovering
    pub direction: Vec2,
    pub fire: bool,
}

impl Intent {
    pub const IDLE: Intent = Intent {
        direction: Vec2::ZERO,
        fire: false,
    };
}

/// Decodes an action into its movement/fire intent
pub fn decode(action: ActionId) -> Intent {
    Intent {
        direction: action
            .direction()
            .map(|d| d.unit_vector())
            .unwrap_or(Vec2::ZERO),
        fire: action.fires(),
    }
}

/// Decodes an untrusted id, rejecting anything outside the action set
pub fn decode_raw(id: u8) -> Result<Intent, ActionError> {
    ActionId::new(id).map(decode)
}
