//! Ability score modifiers (5e rules)

use crate::store::Character;

/// Modifier for an ability score: `floor((score - 10) / 2)`
pub fn ability_modifier(score: i32) -> i32 {
    score.saturating_sub(10).div_euclid(2)
}

/// Initiative uses the dexterity modifier
pub fn initiative_modifier(character: &Character) -> i32 {
    ability_modifier(character.dexterity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ability_modifier_rounds_down() {
        assert_eq!(ability_modifier(10), 0);
        assert_eq!(ability_modifier(11), 0);
        assert_eq!(ability_modifier(9), -1);
        assert_eq!(ability_modifier(8), -1);
        assert_eq!(ability_modifier(1), -5);
        assert_eq!(ability_modifier(16), 3);
        assert_eq!(ability_modifier(20), 5);
    }

    #[test]
    fn test_ability_modifier_extreme_scores() {
        assert_eq!(ability_modifier(i32::MAX), (i32::MAX - 10) / 2);
        assert_eq!(ability_modifier(i32::MIN), i32::MIN / 2);
    }
}
