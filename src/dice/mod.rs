//! Dice rolling engine
//!
//! Parses and rolls dice notation like "2d6+3", "d20", "4d6-2".
//! Only the standard polyhedral set (d4, d6, d8, d10, d12, d20, d100) is
//! accepted, with between 1 and 100 dice per roll.

use std::str::FromStr;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Die sizes accepted by the parser
pub const SUPPORTED_SIDES: [u32; 7] = [4, 6, 8, 10, 12, 20, 100];

/// Maximum number of dice in a single roll
pub const MAX_DICE: u32 = 100;

/// Largest modifier magnitude accepted after the dice
pub const MAX_MODIFIER: i32 = 10_000;

static DICE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)?d(\d+)([+-]\d+)?$").unwrap());

/// Dice notation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("Invalid dice notation: {0}")]
    InvalidNotation(String),

    #[error("Invalid dice type: d{0}")]
    UnsupportedDie(String),

    #[error("Invalid dice count: {0}")]
    InvalidCount(String),
}

/// A parsed dice roll specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceRoll {
    /// Number of dice to roll
    pub count: u32,
    /// Number of sides per die
    pub sides: u32,
    /// Modifier added once to the sum
    pub modifier: i32,
}

/// Outcome of a single roll-set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollResult {
    pub rolls: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
}

/// Advantage mode for d20-style rolls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollMode {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

/// Outcome of a roll made with advantage or disadvantage.
///
/// `all_rolls` holds every roll-set that was drawn (one for normal mode,
/// two otherwise) so the caller can show what the other set would have been.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvantageRoll {
    pub mode: RollMode,
    pub rolls: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
    pub all_rolls: Vec<Vec<u32>>,
    pub chosen_index: usize,
}

impl AdvantageRoll {
    /// Total of the roll-set that was not chosen, if there was one
    pub fn other_total(&self) -> Option<i32> {
        if self.all_rolls.len() < 2 {
            return None;
        }
        let other = &self.all_rolls[1 - self.chosen_index];
        Some(other.iter().sum::<u32>() as i32 + self.modifier)
    }
}

impl DiceRoll {
    /// Create a new dice roll
    pub fn new(count: u32, sides: u32, modifier: i32) -> Self {
        Self {
            count,
            sides,
            modifier,
        }
    }

    /// Roll and return individual die results plus total
    pub fn roll_detailed(&self) -> RollResult {
        let mut rng = rand::rng();
        let rolls: Vec<u32> = (0..self.count)
            .map(|_| rng.random_range(1..=self.sides))
            .collect();

        let sum: u32 = rolls.iter().sum();
        RollResult {
            total: sum as i32 + self.modifier,
            modifier: self.modifier,
            rolls,
        }
    }

    /// Get the minimum possible result
    pub fn min(&self) -> i32 {
        self.count as i32 + self.modifier
    }

    /// Get the maximum possible result
    pub fn max(&self) -> i32 {
        (self.count * self.sides) as i32 + self.modifier
    }
}

impl FromStr for DiceRoll {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_dice(s)
    }
}

impl std::fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.modifier > 0 {
            write!(f, "{}d{}+{}", self.count, self.sides, self.modifier)
        } else if self.modifier < 0 {
            write!(f, "{}d{}{}", self.count, self.sides, self.modifier)
        } else {
            write!(f, "{}d{}", self.count, self.sides)
        }
    }
}

/// Parse a dice notation string like "2d6+3".
///
/// All whitespace is stripped first, so "2d6 + 3" is accepted.
pub fn parse_dice(notation: &str) -> Result<DiceRoll, DiceError> {
    let compact: String = notation.chars().filter(|c| !c.is_whitespace()).collect();

    let caps = DICE_REGEX
        .captures(&compact)
        .ok_or_else(|| DiceError::InvalidNotation(notation.to_string()))?;

    let count = match caps.get(1) {
        Some(m) => m
            .as_str()
            .parse::<u32>()
            .map_err(|_| DiceError::InvalidCount(m.as_str().to_string()))?,
        None => 1,
    };

    let sides_str = &caps[2];
    let sides: u32 = sides_str
        .parse()
        .map_err(|_| DiceError::UnsupportedDie(sides_str.to_string()))?;
    if !SUPPORTED_SIDES.contains(&sides) {
        return Err(DiceError::UnsupportedDie(sides_str.to_string()));
    }

    if !(1..=MAX_DICE).contains(&count) {
        return Err(DiceError::InvalidCount(count.to_string()));
    }

    let modifier = match caps.get(3) {
        Some(m) => m
            .as_str()
            .parse::<i32>()
            .ok()
            .filter(|m| (-MAX_MODIFIER..=MAX_MODIFIER).contains(m))
            .ok_or_else(|| DiceError::InvalidNotation(notation.to_string()))?,
        None => 0,
    };

    Ok(DiceRoll {
        count,
        sides,
        modifier,
    })
}

/// Parse and roll a notation string
pub fn roll(notation: &str) -> Result<RollResult, DiceError> {
    Ok(parse_dice(notation)?.roll_detailed())
}

/// Roll with advantage, disadvantage, or normally.
///
/// Advantage keeps the higher of two full roll-sets, disadvantage the lower.
/// Ties always resolve to the first set.
pub fn roll_with_advantage(notation: &str, mode: RollMode) -> Result<AdvantageRoll, DiceError> {
    let dice = parse_dice(notation)?;

    let sets = match mode {
        RollMode::Normal => vec![dice.roll_detailed()],
        RollMode::Advantage | RollMode::Disadvantage => {
            vec![dice.roll_detailed(), dice.roll_detailed()]
        }
    };

    let chosen_index = match sets.as_slice() {
        [first, second] => choose_index(mode, first.total, second.total),
        _ => 0,
    };

    let chosen = sets[chosen_index].clone();
    Ok(AdvantageRoll {
        mode,
        rolls: chosen.rolls,
        modifier: chosen.modifier,
        total: chosen.total,
        all_rolls: sets.into_iter().map(|s| s.rolls).collect(),
        chosen_index,
    })
}

/// Pick which of two totals a mode keeps (0 or 1). Ties keep the first.
pub fn choose_index(mode: RollMode, first: i32, second: i32) -> usize {
    match mode {
        RollMode::Advantage if second > first => 1,
        RollMode::Disadvantage if second < first => 1,
        _ => 0,
    }
}

/// Roll a d20 for initiative
pub fn roll_initiative() -> i32 {
    rand::rng().random_range(1..=20)
}

/// Roll a d20 ability check, returning (natural roll, total)
pub fn roll_ability_check(modifier: i32) -> (i32, i32) {
    let raw = roll_initiative();
    (raw, raw.saturating_add(modifier))
}
