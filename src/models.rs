//! Domain records exchanged with the remote API and cached locally.
//!
//! The engine never interprets these beyond what reconciliation and the
//! daily aggregates need: dates to place food entries, nutrition numbers to
//! sum. Goal math done server-side (BMR/TDEE) rides along in
//! [`Profile::extra`] untouched.

use std::ops::{Add, AddAssign};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A canonical server record: server-issued id plus the entity body.
///
/// # Example
///
/// ```
/// use nutrisync::{Record, CustomFood, Nutrition};
///
/// let record = Record {
///     id: "cf-7".to_string(),
///     data: CustomFood {
///         name: "Overnight oats".into(),
///         brand: None,
///         serving_g: 250.0,
///         nutrition: Nutrition::new(380.0, 14.0, 55.0, 11.0),
///     },
/// };
/// let json = serde_json::to_value(&record).unwrap();
/// assert_eq!(json["id"], "cf-7");
/// assert_eq!(json["name"], "Overnight oats");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Record<T> {
    pub fn new(id: impl Into<String>, data: T) -> Self {
        Self { id: id.into(), data }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Nutrition {
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

impl Nutrition {
    #[must_use]
    pub fn new(calories: f64, protein_g: f64, carbs_g: f64, fat_g: f64) -> Self {
        Self { calories, protein_g, carbs_g, fat_g }
    }

    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            calories: self.calories * factor,
            protein_g: self.protein_g * factor,
            carbs_g: self.carbs_g * factor,
            fat_g: self.fat_g * factor,
        }
    }
}

impl Add for Nutrition {
    type Output = Nutrition;

    fn add(self, rhs: Nutrition) -> Nutrition {
        Nutrition {
            calories: self.calories + rhs.calories,
            protein_g: self.protein_g + rhs.protein_g,
            carbs_g: self.carbs_g + rhs.carbs_g,
            fat_g: self.fat_g + rhs.fat_g,
        }
    }
}

impl AddAssign for Nutrition {
    fn add_assign(&mut self, rhs: Nutrition) {
        *self = *self + rhs;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub const ALL: [MealType; 4] = [Self::Breakfast, Self::Lunch, Self::Dinner, Self::Snack];
}

impl std::fmt::Display for MealType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Breakfast => write!(f, "breakfast"),
            Self::Lunch => write!(f, "lunch"),
            Self::Dinner => write!(f, "dinner"),
            Self::Snack => write!(f, "snack"),
        }
    }
}

/// One logged food on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodEntry {
    pub date: NaiveDate,
    pub meal_type: MealType,
    pub food_name: String,
    pub serving_g: f64,
    pub nutrition: Nutrition,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NutritionGoals {
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    #[serde(default)]
    pub goals: Option<NutritionGoals>,
    /// Server-computed fields (BMR, TDEE, activity level...) carried opaquely.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFood {
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    pub serving_g: f64,
    pub nutrition: Nutrition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub name: String,
    pub grams: f64,
    pub nutrition: Nutrition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub servings: f64,
    pub ingredients: Vec<RecipeIngredient>,
}

impl Recipe {
    /// Whole-recipe nutrition divided by servings. Zero servings yields zeros.
    #[must_use]
    pub fn nutrition_per_serving(&self) -> Nutrition {
        if self.servings <= 0.0 {
            return Nutrition::default();
        }
        let total = self
            .ingredients
            .iter()
            .fold(Nutrition::default(), |acc, i| acc + i.nutrition);
        total.scaled(1.0 / self.servings)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodSearchHit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    pub serving_g: f64,
    pub nutrition: Nutrition,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_flattens_body() {
        let record = Record::new(
            "fe-1",
            FoodEntry {
                date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
                meal_type: MealType::Lunch,
                food_name: "Lentil soup".into(),
                serving_g: 300.0,
                nutrition: Nutrition::new(270.0, 18.0, 40.0, 4.0),
            },
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "fe-1");
        assert_eq!(value["date"], "2026-03-14");
        assert_eq!(value["meal_type"], "lunch");

        let back: Record<FoodEntry> = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_profile_keeps_opaque_fields() {
        let value = json!({
            "id": "user-1",
            "display_name": "Sam",
            "goals": {"calories": 2100.0, "protein_g": 140.0, "carbs_g": 220.0, "fat_g": 70.0},
            "bmr": 1650.5,
            "activity_level": "moderate"
        });

        let record: Record<Profile> = serde_json::from_value(value).unwrap();
        assert_eq!(record.id, "user-1");
        assert_eq!(record.data.extra["bmr"], json!(1650.5));
        assert!(!record.data.extra.contains_key("id"));
        assert_eq!(record.data.goals.unwrap().calories, 2100.0);
    }

    #[test]
    fn test_recipe_per_serving() {
        let recipe = Recipe {
            name: "Chili".into(),
            servings: 4.0,
            ingredients: vec![
                RecipeIngredient { name: "beans".into(), grams: 800.0, nutrition: Nutrition::new(800.0, 56.0, 120.0, 4.0) },
                RecipeIngredient { name: "beef".into(), grams: 500.0, nutrition: Nutrition::new(1200.0, 104.0, 0.0, 84.0) },
            ],
        };

        let per = recipe.nutrition_per_serving();
        assert_eq!(per.calories, 500.0);
        assert_eq!(per.protein_g, 40.0);
        assert_eq!(per.fat_g, 22.0);
    }

    #[test]
    fn test_recipe_zero_servings() {
        let recipe = Recipe { name: "Empty".into(), servings: 0.0, ingredients: vec![] };
        assert_eq!(recipe.nutrition_per_serving(), Nutrition::default());
    }
}
