// SqliteStore — rusqlite backend implementing the Store trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across an .await on anything else.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{AnalysisResult, Cluster, EvaluationRecord, Theme};
use super::queries;
use super::traits::{Store, StoreCounts};
use crate::insights::models::Insight;
use crate::language::Language;
use crate::themes::taxonomy::categorize;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_record(&self, record: &EvaluationRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::put_record(&conn, record)
    }

    async fn get_record(&self, id: &str) -> Result<Option<EvaluationRecord>> {
        let conn = self.conn.lock().await;
        queries::get_record(&conn, id)
    }

    async fn list_records(&self) -> Result<Vec<EvaluationRecord>> {
        let conn = self.conn.lock().await;
        queries::list_records(&conn)
    }

    async fn put_result(&self, result: &AnalysisResult) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::put_result(&conn, result)
    }

    async fn get_result(&self, record_id: &str) -> Result<Option<AnalysisResult>> {
        let conn = self.conn.lock().await;
        queries::get_result(&conn, record_id)
    }

    async fn list_results(&self) -> Result<Vec<AnalysisResult>> {
        let conn = self.conn.lock().await;
        queries::list_results(&conn)
    }

    async fn add_theme_counts(&self, deltas: &[(String, Language, i64)]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        queries::add_theme_counts(&mut conn, deltas)
    }

    async fn list_themes(&self) -> Result<Vec<Theme>> {
        let rows = {
            let conn = self.conn.lock().await;
            queries::list_theme_counts(&conn)?
        };
        Ok(rows
            .into_iter()
            .map(|(name, language, frequency)| Theme {
                category: categorize(&name, language),
                name,
                language,
                frequency,
            })
            .collect())
    }

    async fn replace_clusters(&self, clusters: &[Cluster]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        queries::replace_clusters(&mut conn, clusters)
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let conn = self.conn.lock().await;
        queries::list_clusters(&conn)
    }

    async fn upsert_insight(&self, insight: &Insight) -> Result<Insight> {
        let conn = self.conn.lock().await;
        queries::upsert_insight(&conn, insight)
    }

    async fn delete_insights(&self, keys: &[String]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        queries::delete_insights(&mut conn, keys)
    }

    async fn list_insights(&self) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().await;
        queries::list_insights(&conn)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let conn = self.conn.lock().await;
        queries::counts(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_tables;
    use crate::themes::taxonomy::Category;

    async fn test_store() -> SqliteStore {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        SqliteStore::new(conn)
    }

    #[tokio::test]
    async fn test_trait_themes_are_categorized() {
        let store = test_store().await;
        store
            .add_theme_counts(&[
                ("formateur".into(), Language::Fr, 3),
                ("parking".into(), Language::Fr, 5),
            ])
            .await
            .unwrap();

        let themes = store.list_themes().await.unwrap();
        assert_eq!(themes.len(), 2);
        assert_eq!(themes[0].name, "parking");
        assert_eq!(themes[0].category, Category::Other);
        assert_eq!(themes[1].category, Category::Trainer);
    }

    #[tokio::test]
    async fn test_trait_table_count() {
        let store = test_store().await;
        assert_eq!(store.table_count().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_trait_empty_store() {
        let store = test_store().await;
        assert!(store.list_records().await.unwrap().is_empty());
        assert!(store.list_clusters().await.unwrap().is_empty());
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
    }
}
