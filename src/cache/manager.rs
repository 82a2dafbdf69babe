//! Named caches and their coupled invalidation rules (spec.md §4.2).
//!
//! The five caches and their capacities/TTLs come straight from the spec's
//! table; the invalidation coupling (writing a category also busts the
//! owning user's category-list entry, etc.) is the same "cache sits next to
//! the repository and is told what changed" shape as the teacher's
//! `ProfileCache`, generalized to five independent tables instead of one.

use std::time::Duration;

use crate::cache::lru_ttl::{CacheStats, LruTtlCache};
use crate::domain::{Category, CategoryKeyword, User};

pub struct CacheManager {
    users: LruTtlCache<String, User>,
    categories: LruTtlCache<i64, Category>,
    user_categories: LruTtlCache<String, Vec<Category>>,
    category_keywords: LruTtlCache<i64, Vec<CategoryKeyword>>,
    metrics: LruTtlCache<String, serde_json::Value>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self {
            users: LruTtlCache::new(1000, Some(Duration::from_secs(3600))),
            categories: LruTtlCache::new(5000, Some(Duration::from_secs(1800))),
            user_categories: LruTtlCache::new(1000, Some(Duration::from_secs(900))),
            category_keywords: LruTtlCache::new(10_000, Some(Duration::from_secs(3600))),
            metrics: LruTtlCache::new(365, Some(Duration::from_secs(86_400))),
        }
    }

    pub async fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.get(&user_id.to_string()).await
    }

    pub async fn put_user(&self, user: User) {
        self.users.set(user.user_id.clone(), user).await;
    }

    pub async fn get_category(&self, category_id: i64) -> Option<Category> {
        self.categories.get(&category_id).await
    }

    pub async fn put_category(&self, category: Category) {
        self.categories.set(category.id, category).await;
    }

    /// Writing a single category invalidates that category *and* the owning
    /// user's category-list cache.
    pub async fn invalidate_category(&self, category_id: i64, user_id: &str) {
        self.categories.delete(&category_id).await;
        self.user_categories.delete(&user_id.to_string()).await;
    }

    pub async fn get_user_categories(&self, user_id: &str) -> Option<Vec<Category>> {
        self.user_categories.get(&user_id.to_string()).await
    }

    pub async fn put_user_categories(&self, user_id: &str, categories: Vec<Category>) {
        self.user_categories
            .set(user_id.to_string(), categories)
            .await;
    }

    pub async fn get_category_keywords(&self, category_id: i64) -> Option<Vec<CategoryKeyword>> {
        self.category_keywords.get(&category_id).await
    }

    pub async fn put_category_keywords(&self, category_id: i64, keywords: Vec<CategoryKeyword>) {
        self.category_keywords.set(category_id, keywords).await;
    }

    /// Keyword set mutations invalidate the per-category keyword entry.
    pub async fn invalidate_category_keywords(&self, category_id: i64) {
        self.category_keywords.delete(&category_id).await;
    }

    /// Clears the user entry and user-categories-list for `uid`.
    pub async fn invalidate_user_data(&self, user_id: &str) {
        self.users.delete(&user_id.to_string()).await;
        self.user_categories.delete(&user_id.to_string()).await;
    }

    pub async fn get_metrics(&self, date_key: &str) -> Option<serde_json::Value> {
        self.metrics.get(&date_key.to_string()).await
    }

    pub async fn put_metrics(&self, date_key: &str, value: serde_json::Value) {
        self.metrics.set(date_key.to_string(), value).await;
    }

    /// Sweeps all five caches; called periodically by the maintenance loop.
    pub async fn cleanup_expired(&self) -> usize {
        self.users.cleanup_expired().await
            + self.categories.cleanup_expired().await
            + self.user_categories.cleanup_expired().await
            + self.category_keywords.cleanup_expired().await
            + self.metrics.cleanup_expired().await
    }

    pub async fn clear_all(&self) {
        self.users.clear().await;
        self.categories.clear().await;
        self.user_categories.clear().await;
        self.category_keywords.clear().await;
        self.metrics.clear().await;
    }

    pub async fn stats(&self) -> CacheManagerStats {
        CacheManagerStats {
            users: self.users.stats().await,
            categories: self.categories.stats().await,
            user_categories: self.user_categories.stats().await,
            category_keywords: self.category_keywords.stats().await,
            metrics: self.metrics.stats().await,
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheManagerStats {
    pub users: CacheStats,
    pub categories: CacheStats,
    pub user_categories: CacheStats,
    pub category_keywords: CacheStats,
    pub metrics: CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_user(id: &str) -> User {
        User {
            user_id: id.to_string(),
            messenger_type: crate::domain::MessengerType::Terminal,
            created_at: Utc::now(),
        }
    }

    fn test_category(id: i64, user_id: &str) -> Category {
        Category {
            id,
            user_id: user_id.to_string(),
            name: "Food".to_string(),
            is_default: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_then_get_user() {
        let mgr = CacheManager::new();
        mgr.put_user(test_user("u1")).await;
        assert!(mgr.get_user("u1").await.is_some());
    }

    #[tokio::test]
    async fn invalidate_category_clears_both_entries() {
        let mgr = CacheManager::new();
        mgr.put_category(test_category(1, "u1")).await;
        mgr.put_user_categories("u1", vec![test_category(1, "u1")])
            .await;
        mgr.invalidate_category(1, "u1").await;
        assert!(mgr.get_category(1).await.is_none());
        assert!(mgr.get_user_categories("u1").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_user_data_clears_user_and_categories_list() {
        let mgr = CacheManager::new();
        mgr.put_user(test_user("u1")).await;
        mgr.put_user_categories("u1", vec![test_category(1, "u1")])
            .await;
        mgr.invalidate_user_data("u1").await;
        assert!(mgr.get_user("u1").await.is_none());
        assert!(mgr.get_user_categories("u1").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_category_keywords_is_scoped_to_category() {
        let mgr = CacheManager::new();
        mgr.put_category_keywords(1, vec![]).await;
        mgr.put_category_keywords(2, vec![]).await;
        mgr.invalidate_category_keywords(1).await;
        assert!(mgr.get_category_keywords(1).await.is_none());
        assert!(mgr.get_category_keywords(2).await.is_some());
    }
}
