//! In-memory read model: what the UI currently shows.
//!
//! Canonical lists come from the resolver; provisional entities are
//! overlaid on top of them by the coordinator. Nothing in here suspends, so
//! every method is atomic with respect to other tasks.
//!
//! Local changes to canonical data (confirmations, online writes, deletes)
//! bump a revision per [`Collection`]. A fetch records the revision it
//! started at; if its collection changed since, the fetched list is older
//! than what is held here and the merge keeps the local view.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;

use super::entity::Entity;
use crate::models::{CustomFood, FoodEntry, Profile, Recipe, Record};

/// A unit of the read model that a single fetch replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Profile,
    FoodEntries(NaiveDate),
    CustomFoods,
    Recipes,
}

#[derive(Debug, Default)]
pub struct ReadModel {
    profile: Option<Entity<Profile>>,
    /// A date is present once loaded or once a provisional entry lands on it
    food_entries: BTreeMap<NaiveDate, Vec<Entity<FoodEntry>>>,
    custom_foods: Option<Vec<Entity<CustomFood>>>,
    recipes: Option<Vec<Entity<Recipe>>>,
    revision: u64,
    changed_at: HashMap<Collection, u64>,
    /// Last change to a food entry whose date was not known here
    any_food_entries_changed_at: u64,
}

impl ReadModel {
    // ---- change tracking ----

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether `collection` changed locally after revision `since`.
    #[must_use]
    pub fn changed_since(&self, collection: Collection, since: u64) -> bool {
        let mut last = self.changed_at.get(&collection).copied().unwrap_or(0);
        if matches!(collection, Collection::FoodEntries(_)) {
            last = last.max(self.any_food_entries_changed_at);
        }
        last > since
    }

    fn touch(&mut self, collection: Collection) {
        self.revision += 1;
        self.changed_at.insert(collection, self.revision);
    }

    // ---- profile ----

    /// Combine a fetched profile with any pending local update. A pending
    /// update wins until its replay is confirmed; a profile confirmed after
    /// the fetch started wins over the fetched one.
    pub fn merge_profile(&mut self, canonical: Record<Profile>, since: u64) -> Entity<Profile> {
        if let Some(overlay) = self.profile.as_ref().filter(|p| p.is_provisional()) {
            return overlay.clone();
        }
        if self.changed_since(Collection::Profile, since) {
            if let Some(current) = &self.profile {
                return current.clone();
            }
        }
        let entity = Entity::confirmed(canonical);
        self.profile = Some(entity.clone());
        entity
    }

    #[must_use]
    pub fn profile(&self) -> Option<Entity<Profile>> {
        self.profile.clone()
    }

    pub fn overlay_profile(&mut self, entity: Entity<Profile>) {
        self.profile = Some(entity);
    }

    pub fn restore_profile(&mut self, previous: Option<Entity<Profile>>) {
        self.profile = previous;
    }

    /// Accept a confirmed profile unless a newer local update is still queued.
    pub fn confirm_profile(&mut self, sequence: u64, record: Record<Profile>) {
        let newer_pending = matches!(&self.profile, Some(Entity::Provisional { queue_ref, .. }) if *queue_ref != sequence);
        if !newer_pending {
            self.profile = Some(Entity::confirmed(record));
            self.touch(Collection::Profile);
        }
    }

    pub fn set_profile(&mut self, record: Record<Profile>) {
        self.profile = Some(Entity::confirmed(record));
        self.touch(Collection::Profile);
    }

    /// Drop the overlay for `sequence`; the next read shows canonical data.
    pub fn drop_profile_overlay(&mut self, sequence: u64) -> bool {
        if matches!(&self.profile, Some(Entity::Provisional { queue_ref, .. }) if *queue_ref == sequence) {
            self.profile = None;
            return true;
        }
        false
    }

    // ---- food entries ----

    pub fn merge_food_entries(
        &mut self,
        date: NaiveDate,
        canonical: Vec<Record<FoodEntry>>,
        hidden: &HashSet<String>,
        since: u64,
    ) -> Vec<Entity<FoodEntry>> {
        if self.changed_since(Collection::FoodEntries(date), since) {
            if let Some(list) = self.food_entries.get(&date) {
                return visible(list, hidden);
            }
        }
        let list = self.food_entries.entry(date).or_default();
        merge_canonical(list, canonical);
        visible(list, hidden)
    }

    /// Current view of a date, if it was ever loaded or written to.
    #[must_use]
    pub fn food_entries(&self, date: NaiveDate, hidden: &HashSet<String>) -> Option<Vec<Entity<FoodEntry>>> {
        self.food_entries.get(&date).map(|list| visible(list, hidden))
    }

    pub fn add_food_entry(&mut self, entity: Entity<FoodEntry>) {
        self.food_entries.entry(entity.data().date).or_default().push(entity);
    }

    pub fn upsert_food_entry(&mut self, record: Record<FoodEntry>) {
        let date = record.data.date;
        upsert_confirmed(self.food_entries.entry(date).or_default(), record);
        self.touch(Collection::FoodEntries(date));
    }

    /// Replace the provisional entry `local_id` with its canonical record.
    pub fn confirm_food_entry(&mut self, local_id: &str, record: Record<FoodEntry>) -> bool {
        let date = record.data.date;
        for (d, list) in self.food_entries.iter_mut() {
            if *d != date {
                list.retain(|e| e.local_id() != Some(local_id));
            }
        }
        let found = replace_local(self.food_entries.entry(date).or_default(), local_id, record);
        self.touch(Collection::FoodEntries(date));
        found
    }

    pub fn remove_food_entry(&mut self, id: &str) -> Option<Entity<FoodEntry>> {
        let removed = self.food_entries.values_mut().find_map(|list| remove_by_id(list, id));
        match &removed {
            Some(entity) => self.touch(Collection::FoodEntries(entity.data().date)),
            None => {
                self.revision += 1;
                self.any_food_entries_changed_at = self.revision;
            }
        }
        removed
    }

    #[must_use]
    pub fn find_food_entry(&self, id: &str) -> Option<Entity<FoodEntry>> {
        self.food_entries
            .values()
            .flat_map(|list| list.iter())
            .find(|e| e.id() == id)
            .cloned()
    }

    // ---- custom foods ----

    pub fn merge_custom_foods(&mut self, canonical: Vec<Record<CustomFood>>, since: u64) -> Vec<Entity<CustomFood>> {
        if self.changed_since(Collection::CustomFoods, since) {
            if let Some(list) = &self.custom_foods {
                return list.clone();
            }
        }
        let list = self.custom_foods.get_or_insert_with(Vec::new);
        merge_canonical(list, canonical);
        list.clone()
    }

    #[must_use]
    pub fn custom_foods(&self) -> Option<Vec<Entity<CustomFood>>> {
        self.custom_foods.clone()
    }

    pub fn add_custom_food(&mut self, entity: Entity<CustomFood>) {
        self.custom_foods.get_or_insert_with(Vec::new).push(entity);
    }

    pub fn upsert_custom_food(&mut self, record: Record<CustomFood>) {
        upsert_confirmed(self.custom_foods.get_or_insert_with(Vec::new), record);
        self.touch(Collection::CustomFoods);
    }

    pub fn confirm_custom_food(&mut self, local_id: &str, record: Record<CustomFood>) -> bool {
        let found = replace_local(self.custom_foods.get_or_insert_with(Vec::new), local_id, record);
        self.touch(Collection::CustomFoods);
        found
    }

    pub fn remove_custom_food(&mut self, id: &str) -> Option<Entity<CustomFood>> {
        let removed = self.custom_foods.as_mut().and_then(|list| remove_by_id(list, id));
        self.touch(Collection::CustomFoods);
        removed
    }

    // ---- recipes ----

    pub fn merge_recipes(&mut self, canonical: Vec<Record<Recipe>>, since: u64) -> Vec<Entity<Recipe>> {
        if self.changed_since(Collection::Recipes, since) {
            if let Some(list) = &self.recipes {
                return list.clone();
            }
        }
        let list = self.recipes.get_or_insert_with(Vec::new);
        merge_canonical(list, canonical);
        list.clone()
    }

    #[must_use]
    pub fn recipes(&self) -> Option<Vec<Entity<Recipe>>> {
        self.recipes.clone()
    }

    pub fn add_recipe(&mut self, entity: Entity<Recipe>) {
        self.recipes.get_or_insert_with(Vec::new).push(entity);
    }

    pub fn upsert_recipe(&mut self, record: Record<Recipe>) {
        upsert_confirmed(self.recipes.get_or_insert_with(Vec::new), record);
        self.touch(Collection::Recipes);
    }

    pub fn confirm_recipe(&mut self, local_id: &str, record: Record<Recipe>) -> bool {
        let found = replace_local(self.recipes.get_or_insert_with(Vec::new), local_id, record);
        self.touch(Collection::Recipes);
        found
    }

    pub fn remove_recipe(&mut self, id: &str) -> Option<Entity<Recipe>> {
        let removed = self.recipes.as_mut().and_then(|list| remove_by_id(list, id));
        self.touch(Collection::Recipes);
        removed
    }

    /// Forget confirmed data (after the cache was cleared). Pending local
    /// writes stay visible.
    pub fn reset_confirmed(&mut self) {
        if matches!(self.profile, Some(Entity::Confirmed { .. })) {
            self.profile = None;
        }
        self.food_entries.retain(|_, list| {
            list.retain(Entity::is_provisional);
            !list.is_empty()
        });
        if let Some(list) = self.custom_foods.as_mut() {
            list.retain(Entity::is_provisional);
        }
        if let Some(list) = self.recipes.as_mut() {
            list.retain(Entity::is_provisional);
        }
    }
}

/// Canonical records first (deduplicated by server id, server order kept),
/// then the provisional entities already in `list`.
fn merge_canonical<T: Clone>(list: &mut Vec<Entity<T>>, canonical: Vec<Record<T>>) {
    let mut seen = HashSet::new();
    let mut merged: Vec<Entity<T>> = canonical
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .map(Entity::confirmed)
        .collect();
    merged.extend(list.drain(..).filter(Entity::is_provisional));
    *list = merged;
}

fn visible<T: Clone>(list: &[Entity<T>], hidden: &HashSet<String>) -> Vec<Entity<T>> {
    list.iter().filter(|e| !hidden.contains(e.id())).cloned().collect()
}

fn upsert_confirmed<T>(list: &mut Vec<Entity<T>>, record: Record<T>) {
    match list.iter().position(|e| e.server_id() == Some(record.id.as_str())) {
        Some(pos) => list[pos] = Entity::confirmed(record),
        None => list.push(Entity::confirmed(record)),
    }
}

/// Swap provisional `local_id` for `record` in place, dropping any other
/// copy of the same server record. Falls back to an upsert when the
/// provisional entity is gone. Returns whether it was found.
fn replace_local<T>(list: &mut Vec<Entity<T>>, local_id: &str, record: Record<T>) -> bool {
    let Some(pos) = list.iter().position(|e| e.local_id() == Some(local_id)) else {
        upsert_confirmed(list, record);
        return false;
    };
    let server_id = record.id.clone();
    list[pos] = Entity::confirmed(record);

    let mut idx = 0;
    list.retain(|e| {
        let keep = idx == pos || e.server_id() != Some(server_id.as_str());
        idx += 1;
        keep
    });
    true
}

fn remove_by_id<T>(list: &mut Vec<Entity<T>>, id: &str) -> Option<Entity<T>> {
    let pos = list.iter().position(|e| e.id() == id)?;
    Some(list.remove(pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MealType, Nutrition};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()
    }

    fn entry(name: &str) -> FoodEntry {
        FoodEntry {
            date: date(),
            meal_type: MealType::Breakfast,
            food_name: name.into(),
            serving_g: 100.0,
            nutrition: Nutrition::new(100.0, 5.0, 10.0, 2.0),
        }
    }

    fn provisional(local: &str, name: &str, seq: u64) -> Entity<FoodEntry> {
        Entity::Provisional { local_id: local.into(), data: entry(name), queue_ref: seq }
    }

    #[test]
    fn test_merge_keeps_provisionals_after_canonical() {
        let mut model = ReadModel::default();
        model.add_food_entry(provisional("local-a", "toast", 1));

        let since = model.revision();
        let merged = model.merge_food_entries(
            date(),
            vec![Record::new("fe-1", entry("eggs")), Record::new("fe-1", entry("eggs"))],
            &HashSet::new(),
            since,
        );
        let ids: Vec<_> = merged.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["fe-1", "local-a"]);
    }

    #[test]
    fn test_confirm_replaces_in_place_without_duplicate() {
        let mut model = ReadModel::default();
        model.add_food_entry(provisional("local-a", "toast", 1));
        // Canonical copy already arrived via a refresh
        let since = model.revision();
        model.merge_food_entries(date(), vec![Record::new("fe-9", entry("toast"))], &HashSet::new(), since);

        assert!(model.confirm_food_entry("local-a", Record::new("fe-9", entry("toast"))));

        let list = model.food_entries(date(), &HashSet::new()).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].server_id(), Some("fe-9"));
    }

    #[test]
    fn test_hidden_ids_are_filtered() {
        let mut model = ReadModel::default();
        let hidden: HashSet<String> = ["fe-2".to_string()].into();
        let merged = model.merge_food_entries(
            date(),
            vec![Record::new("fe-1", entry("a")), Record::new("fe-2", entry("b"))],
            &hidden,
            0,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id(), "fe-1");
    }

    #[test]
    fn test_unloaded_date_is_none() {
        let model = ReadModel::default();
        assert!(model.food_entries(date(), &HashSet::new()).is_none());
    }

    #[test]
    fn test_profile_overlay_rules() {
        let mut model = ReadModel::default();
        let canonical = Record::new("u1", Profile { display_name: "Sam".into(), goals: None, extra: Default::default() });
        let local = Profile { display_name: "Samuel".into(), goals: None, extra: Default::default() };

        model.overlay_profile(Entity::Provisional { local_id: "local-p".into(), data: local.clone(), queue_ref: 7 });
        assert!(model.merge_profile(canonical.clone(), 0).is_provisional());

        // An older confirmation must not clobber the newer overlay
        model.confirm_profile(6, canonical.clone());
        assert!(model.profile().unwrap().is_provisional());

        model.confirm_profile(7, Record::new("u1", local));
        assert_eq!(model.profile().unwrap().data().display_name, "Samuel");
        assert!(!model.drop_profile_overlay(7));
    }

    #[test]
    fn test_reset_confirmed_keeps_provisionals() {
        let mut model = ReadModel::default();
        model.merge_food_entries(date(), vec![Record::new("fe-1", entry("a"))], &HashSet::new(), 0);
        model.add_food_entry(provisional("local-b", "b", 2));

        model.reset_confirmed();
        let list = model.food_entries(date(), &HashSet::new()).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list[0].is_provisional());
    }

    #[test]
    fn test_fetch_older_than_confirmation_keeps_local_view() {
        let mut model = ReadModel::default();
        model.add_food_entry(provisional("local-a", "toast", 1));

        // Fetch starts, then the create is confirmed before it answers
        let since = model.revision();
        model.confirm_food_entry("local-a", Record::new("fe-1", entry("toast")));
        assert!(model.changed_since(Collection::FoodEntries(date()), since));

        let merged = model.merge_food_entries(date(), Vec::new(), &HashSet::new(), since);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].server_id(), Some("fe-1"));

        // A fetch started afterwards is authoritative again
        let since = model.revision();
        assert!(!model.changed_since(Collection::FoodEntries(date()), since));
        assert!(model.merge_food_entries(date(), Vec::new(), &HashSet::new(), since).is_empty());
    }

    #[test]
    fn test_changes_are_tracked_per_collection() {
        let mut model = ReadModel::default();
        let since = model.revision();
        model.upsert_custom_food(Record::new(
            "cf-1",
            CustomFood { name: "Bar".into(), brand: None, serving_g: 40.0, nutrition: Nutrition::new(200.0, 10.0, 20.0, 8.0) },
        ));

        assert!(model.changed_since(Collection::CustomFoods, since));
        assert!(!model.changed_since(Collection::Recipes, since));
        assert!(!model.changed_since(Collection::FoodEntries(date()), since));

        // Removing an entry whose date is unknown marks every date
        model.remove_food_entry("fe-unknown");
        assert!(model.changed_since(Collection::FoodEntries(date()), since));
    }
}
