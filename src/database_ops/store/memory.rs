//! In-process store with the same insert-or-ignore and page-transaction
//! semantics as the SQL backends. Backs `--store memory` dry runs and tests.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{CatalogStore, PageWriter};
use crate::config::StoreBackend;
use crate::database_ops::fdc::normalize::{FoodRecord, NutrientEntry};
use crate::error::IngestResult;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFood {
    pub id: i64,
    pub record: FoodRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNutrient {
    pub id: i64,
    pub entry: NutrientEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredLink {
    pub id: i64,
    pub food_id: i64,
    pub nutrient_id: i64,
    pub amount: Option<f64>,
    pub unit_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub foods: Vec<StoredFood>,
    pub nutrients: Vec<StoredNutrient>,
    pub links: Vec<StoredLink>,
    next_id: i64,
    food_by_fdc: HashMap<i64, i64>,
    nutrient_by_number: HashMap<String, i64>,
    link_keys: HashMap<(i64, i64), i64>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Empty journal whose ids continue after the committed ones.
    fn journal(&self) -> Tables {
        Tables {
            next_id: self.next_id,
            ..Tables::default()
        }
    }

    fn apply(&mut self, journal: Tables) {
        self.next_id = self.next_id.max(journal.next_id);
        self.foods.extend(journal.foods);
        self.nutrients.extend(journal.nutrients);
        self.links.extend(journal.links);
        self.food_by_fdc.extend(journal.food_by_fdc);
        self.nutrient_by_number.extend(journal.nutrient_by_number);
        self.link_keys.extend(journal.link_keys);
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Copy of the committed state.
    pub fn snapshot(&self) -> Tables {
        lock(&self.tables).clone()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let t = lock(&self.tables);
        (t.foods.len(), t.nutrients.len(), t.links.len())
    }
}

// A poisoned lock still holds consistent committed data: a journal is applied
// under one guard.
fn lock(tables: &Mutex<Tables>) -> MutexGuard<'_, Tables> {
    tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    fn open_page(&self) -> MemoryPage {
        MemoryPage {
            staged: lock(&self.tables).journal(),
            target: Arc::clone(&self.tables),
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn begin_page(&self) -> IngestResult<Box<dyn PageWriter>> {
        Ok(Box::new(self.open_page()))
    }

    async fn migrate(&self) -> IngestResult<()> {
        Ok(())
    }

    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }
}

/// Holds only this page's rows. Lookups see the journal first, then the
/// committed tables.
struct MemoryPage {
    target: Arc<Mutex<Tables>>,
    staged: Tables,
}

impl MemoryPage {
    fn committed_food(&self, fdc_id: i64) -> Option<i64> {
        lock(&self.target).food_by_fdc.get(&fdc_id).copied()
    }

    fn committed_nutrient(&self, number: &str) -> Option<i64> {
        lock(&self.target).nutrient_by_number.get(number).copied()
    }

    fn committed_link(&self, key: (i64, i64)) -> bool {
        lock(&self.target).link_keys.contains_key(&key)
    }
}

#[async_trait]
impl PageWriter for MemoryPage {
    async fn insert_food(&mut self, food: &FoodRecord) -> IngestResult<bool> {
        if self.food_id(food.fdc_id).await?.is_some() {
            return Ok(false);
        }
        let id = self.staged.next_id();
        self.staged.food_by_fdc.insert(food.fdc_id, id);
        self.staged.foods.push(StoredFood {
            id,
            record: food.clone(),
        });
        Ok(true)
    }

    async fn food_id(&mut self, fdc_id: i64) -> IngestResult<Option<i64>> {
        Ok(self
            .staged
            .food_by_fdc
            .get(&fdc_id)
            .copied()
            .or_else(|| self.committed_food(fdc_id)))
    }

    async fn insert_nutrient(&mut self, nutrient: &NutrientEntry) -> IngestResult<bool> {
        if self.nutrient_id(&nutrient.number).await?.is_some() {
            return Ok(false);
        }
        let id = self.staged.next_id();
        self.staged
            .nutrient_by_number
            .insert(nutrient.number.clone(), id);
        self.staged.nutrients.push(StoredNutrient {
            id,
            entry: nutrient.clone(),
        });
        Ok(true)
    }

    async fn nutrient_id(&mut self, number: &str) -> IngestResult<Option<i64>> {
        Ok(self
            .staged
            .nutrient_by_number
            .get(number)
            .copied()
            .or_else(|| self.committed_nutrient(number)))
    }

    async fn insert_food_nutrient(
        &mut self,
        food_id: i64,
        nutrient_id: i64,
        amount: Option<f64>,
        unit_name: Option<&str>,
    ) -> IngestResult<bool> {
        let key = (food_id, nutrient_id);
        if self.staged.link_keys.contains_key(&key) || self.committed_link(key) {
            return Ok(false);
        }
        let id = self.staged.next_id();
        self.staged.link_keys.insert(key, id);
        self.staged.links.push(StoredLink {
            id,
            food_id,
            nutrient_id,
            amount,
            unit_name: unit_name.map(str::to_string),
        });
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> IngestResult<()> {
        let MemoryPage { target, staged } = *self;
        lock(&target).apply(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> IngestResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn food(fdc_id: i64, description: &str) -> FoodRecord {
        FoodRecord {
            fdc_id,
            description: description.into(),
            data_type: "Foundation".into(),
            food_category: None,
            publication_date: None,
            brand_owner: None,
            gtin_upc: None,
            ndb_number: None,
            food_code: None,
        }
    }

    #[tokio::test]
    async fn first_write_wins_and_ids_resolve() {
        let store = MemoryStore::default();
        let mut page = store.begin_page().await.unwrap();
        assert!(page.insert_food(&food(12345, "first")).await.unwrap());
        assert!(!page.insert_food(&food(12345, "second")).await.unwrap());
        let id = page.food_id(12345).await.unwrap().expect("id");
        assert_eq!(page.food_id(99).await.unwrap(), None);
        assert!(page.insert_food_nutrient(id, 7, Some(1.0), Some("g")).await.unwrap());
        assert!(!page.insert_food_nutrient(id, 7, Some(2.0), None).await.unwrap());
        page.commit().await.unwrap();

        let tables = store.snapshot();
        assert_eq!(tables.foods.len(), 1);
        assert_eq!(tables.foods[0].record.description, "first");
        assert_eq!(tables.links[0].amount, Some(1.0));
    }

    #[tokio::test]
    async fn uncommitted_pages_leave_no_trace() {
        let store = MemoryStore::default();
        let mut page = store.begin_page().await.unwrap();
        page.insert_food(&food(1, "a")).await.unwrap();
        page.rollback().await.unwrap();

        let mut dropped = store.begin_page().await.unwrap();
        dropped.insert_food(&food(2, "b")).await.unwrap();
        drop(dropped);

        assert_eq!(store.counts(), (0, 0, 0));
    }

    #[tokio::test]
    async fn pages_stage_only_their_own_rows() {
        let store = MemoryStore::default();
        for batch in 0..20_i64 {
            let mut page = store.begin_page().await.unwrap();
            for n in 0..50 {
                page.insert_food(&food(batch * 50 + n, "f")).await.unwrap();
            }
            page.commit().await.unwrap();
        }

        let mut page = store.open_page();
        assert!(page.staged.foods.is_empty());
        assert!(page.staged.food_by_fdc.is_empty());

        // committed keys are still visible and still ignored
        assert!(!page.insert_food(&food(0, "again")).await.unwrap());
        assert_eq!(page.food_id(999).await.unwrap(), Some(1000));
        assert!(page.insert_food(&food(5000, "new")).await.unwrap());
        assert_eq!(page.staged.foods.len(), 1);
        assert_eq!(page.staged.foods[0].id, 1001);

        Box::new(page).commit().await.unwrap();
        let tables = store.snapshot();
        assert_eq!(tables.foods.len(), 1001);
        assert_eq!(tables.foods[0].record.description, "f");
    }
}
