//! Daily aggregates.
//!
//! Pure functions over entries the caller already resolved. They read no
//! cache, no queue, no clock: the same input always gives the same output.
//! Provisional entries count like confirmed ones, since the UI shows both.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::coordinator::Entity;
use crate::models::{FoodEntry, MealType, Nutrition, NutritionGoals};

pub const KCAL_PER_G_PROTEIN: f64 = 4.0;
pub const KCAL_PER_G_CARBS: f64 = 4.0;
pub const KCAL_PER_G_FAT: f64 = 9.0;

/// Share of macro energy, in percent. All zero when there is no energy.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MacroPercentages {
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

#[must_use]
pub fn daily_totals<'a>(entries: impl IntoIterator<Item = &'a FoodEntry>) -> Nutrition {
    entries
        .into_iter()
        .fold(Nutrition::default(), |acc, e| acc + e.nutrition)
}

#[must_use]
pub fn macro_percentages(totals: &Nutrition) -> MacroPercentages {
    let protein = totals.protein_g.max(0.0) * KCAL_PER_G_PROTEIN;
    let carbs = totals.carbs_g.max(0.0) * KCAL_PER_G_CARBS;
    let fat = totals.fat_g.max(0.0) * KCAL_PER_G_FAT;
    let energy = protein + carbs + fat;
    if energy <= 0.0 {
        return MacroPercentages::default();
    }
    MacroPercentages {
        protein: protein * 100.0 / energy,
        carbs: carbs * 100.0 / energy,
        fat: fat * 100.0 / energy,
    }
}

/// Goal minus consumed. Negative fields mean the goal was exceeded.
#[must_use]
pub fn remaining_to_goal(goals: &NutritionGoals, totals: &Nutrition) -> Nutrition {
    Nutrition {
        calories: goals.calories - totals.calories,
        protein_g: goals.protein_g - totals.protein_g,
        carbs_g: goals.carbs_g - totals.carbs_g,
        fat_g: goals.fat_g - totals.fat_g,
    }
}

/// Per-meal subtotals. Every meal type is present, empty ones as zeros.
#[must_use]
pub fn meal_breakdown<'a>(entries: impl IntoIterator<Item = &'a FoodEntry>) -> BTreeMap<MealType, Nutrition> {
    let mut by_meal: BTreeMap<MealType, Nutrition> = MealType::ALL
        .iter()
        .map(|m| (*m, Nutrition::default()))
        .collect();
    for entry in entries {
        *by_meal.entry(entry.meal_type).or_default() += entry.nutrition;
    }
    by_meal
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub entry_count: usize,
    /// Entries not yet confirmed by the server
    pub pending_count: usize,
    pub totals: Nutrition,
    pub macros: MacroPercentages,
    pub by_meal: BTreeMap<MealType, Nutrition>,
    /// `None` when no goals are set
    pub remaining: Option<Nutrition>,
}

impl DailySummary {
    /// Summarize the entries dated `date`; entries for other dates are ignored.
    #[must_use]
    pub fn compute(date: NaiveDate, entries: &[Entity<FoodEntry>], goals: Option<&NutritionGoals>) -> Self {
        let for_day: Vec<&Entity<FoodEntry>> = entries.iter().filter(|e| e.data().date == date).collect();
        let totals = daily_totals(for_day.iter().map(|e| e.data()));

        Self {
            date,
            entry_count: for_day.len(),
            pending_count: for_day.iter().filter(|e| e.is_provisional()).count(),
            totals,
            macros: macro_percentages(&totals),
            by_meal: meal_breakdown(for_day.iter().map(|e| e.data())),
            remaining: goals.map(|g| remaining_to_goal(g, &totals)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 10).unwrap()
    }

    fn entry(meal: MealType, n: Nutrition) -> FoodEntry {
        FoodEntry {
            date: day(),
            meal_type: meal,
            food_name: "x".into(),
            serving_g: 100.0,
            nutrition: n,
        }
    }

    #[test]
    fn test_totals() {
        let entries = [
            entry(MealType::Breakfast, Nutrition::new(300.0, 20.0, 30.0, 10.0)),
            entry(MealType::Lunch, Nutrition::new(500.0, 30.0, 50.0, 20.0)),
        ];
        assert_eq!(daily_totals(&entries), Nutrition::new(800.0, 50.0, 80.0, 30.0));
        assert_eq!(daily_totals(&Vec::<FoodEntry>::new()), Nutrition::default());
    }

    #[test]
    fn test_macro_percentages_use_energy_split() {
        // 25g protein = 100 kcal, 25g carbs = 100 kcal, 0g fat
        let p = macro_percentages(&Nutrition::new(0.0, 25.0, 25.0, 0.0));
        assert_eq!(p.protein, 50.0);
        assert_eq!(p.carbs, 50.0);
        assert_eq!(p.fat, 0.0);

        let p = macro_percentages(&Nutrition::new(0.0, 10.0, 10.0, 10.0));
        assert!((p.protein + p.carbs + p.fat - 100.0).abs() < 1e-9);
        assert!(p.fat > p.protein);
    }

    #[test]
    fn test_macro_percentages_empty_day() {
        assert_eq!(macro_percentages(&Nutrition::default()), MacroPercentages::default());
    }

    #[test]
    fn test_remaining_goes_negative_when_over() {
        let goals = NutritionGoals { calories: 2000.0, protein_g: 100.0, carbs_g: 250.0, fat_g: 60.0 };
        let remaining = remaining_to_goal(&goals, &Nutrition::new(2200.0, 80.0, 250.0, 70.0));
        assert_eq!(remaining.calories, -200.0);
        assert_eq!(remaining.protein_g, 20.0);
        assert_eq!(remaining.carbs_g, 0.0);
        assert_eq!(remaining.fat_g, -10.0);
    }

    #[test]
    fn test_meal_breakdown_has_every_meal() {
        let entries = [
            entry(MealType::Snack, Nutrition::new(100.0, 1.0, 1.0, 1.0)),
            entry(MealType::Snack, Nutrition::new(50.0, 1.0, 1.0, 1.0)),
        ];
        let by_meal = meal_breakdown(&entries);
        assert_eq!(by_meal.len(), 4);
        assert_eq!(by_meal[&MealType::Snack].calories, 150.0);
        assert_eq!(by_meal[&MealType::Dinner], Nutrition::default());
    }

    #[test]
    fn test_summary_counts_pending_and_ignores_other_dates() {
        let other_day = FoodEntry {
            date: day().succ_opt().unwrap(),
            ..entry(MealType::Dinner, Nutrition::new(999.0, 0.0, 0.0, 0.0))
        };
        let entries = vec![
            Entity::confirmed(Record::new("fe-1", entry(MealType::Lunch, Nutrition::new(400.0, 30.0, 40.0, 10.0)))),
            Entity::Provisional {
                local_id: "local-1".into(),
                data: entry(MealType::Dinner, Nutrition::new(600.0, 40.0, 60.0, 20.0)),
                queue_ref: 1,
            },
            Entity::confirmed(Record::new("fe-2", other_day)),
        ];

        let summary = DailySummary::compute(day(), &entries, None);
        assert_eq!(summary.entry_count, 2);
        assert_eq!(summary.pending_count, 1);
        assert_eq!(summary.totals.calories, 1000.0);
        assert!(summary.remaining.is_none());

        // Deterministic
        assert_eq!(summary, DailySummary::compute(day(), &entries, None));
    }
}
