//! Tantivy-based search index module.
//!
//! Provides full-text search over leads with field boosting. The index is
//! kept current by following the store's change feed.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{ChangeKind, Lead};

const BOOST_NAME: f32 = 10.0;
const BOOST_TAGS: f32 = 7.0;
const BOOST_CATEGORY: f32 = 5.5;
const BOOST_LOCATION: f32 = 4.0;
const BOOST_NOTES: f32 = 3.0;
const BOOST_CONTACT: f32 = 2.5;

/// Search hit with relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub lead_id: String,
    pub score: f32,
}

struct SearchFields {
    lead_id: Field,
    name: Field,
    category: Field,
    location: Field,
    notes: Field,
    tags: Field,
    contact: Field,
}

/// Tantivy search index for leads.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        // Raw token so updates can delete by term
        let lead_id = schema_builder.add_text_field("lead_id", STRING | STORED);
        let name = schema_builder.add_text_field("name", TEXT | STORED);
        let category = schema_builder.add_text_field("category", TEXT);
        let location = schema_builder.add_text_field("location", TEXT);
        let notes = schema_builder.add_text_field("notes", TEXT);
        let tags = schema_builder.add_text_field("tags", TEXT);
        let contact = schema_builder.add_text_field("contact", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            lead_id,
            name,
            category,
            location,
            notes,
            tags,
            contact,
        };

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Rebuild the entire index from leads.
    pub async fn rebuild(&self, leads: &[Lead]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for lead in leads {
            writer.add_document(self.create_document(lead))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} leads", leads.len());
        Ok(())
    }

    /// Index (or re-index) a single lead.
    pub async fn index_lead(&self, lead: &Lead) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        let id = lead.id.to_string();
        writer.delete_term(tantivy::Term::from_field_text(self.fields.lead_id, &id));
        writer.add_document(self.create_document(lead))?;
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    pub async fn remove_lead(&self, lead_id: &str) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(tantivy::Term::from_field_text(self.fields.lead_id, lead_id));
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Search for leads matching the query.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchResult>, AppError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let field_boosts = [
            (self.fields.name, BOOST_NAME),
            (self.fields.tags, BOOST_TAGS),
            (self.fields.category, BOOST_CATEGORY),
            (self.fields.location, BOOST_LOCATION),
            (self.fields.notes, BOOST_NOTES),
            (self.fields.contact, BOOST_CONTACT),
        ];

        let base_query = QueryParser::for_index(
            &self.index,
            field_boosts.iter().map(|(field, _)| *field).collect(),
        )
        .parse_query(query_str)
        .map_err(|e| AppError::Search(format!("Invalid search query: {}", e)))?;

        let mut subqueries: Vec<(Occur, Box<dyn tantivy::query::Query>)> = Vec::new();
        for (field, boost) in field_boosts {
            let field_parser = QueryParser::for_index(&self.index, vec![field]);
            if let Ok(field_query) = field_parser.parse_query(query_str) {
                subqueries.push((Occur::Should, Box::new(BoostQuery::new(field_query, boost))));
            }
        }

        let combined_query = if subqueries.is_empty() {
            base_query
        } else {
            Box::new(BooleanQuery::new(subqueries))
        };

        let top_docs = searcher
            .search(&combined_query, &TopDocs::with_limit(limit + offset))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let results: Vec<SearchResult> = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let lead_id = doc.get_first(self.fields.lead_id)?.as_str()?.to_string();
                Some(SearchResult { lead_id, score })
            })
            .collect();

        Ok(results)
    }

    fn create_document(&self, lead: &Lead) -> TantivyDocument {
        let location = [lead.city.as_deref(), lead.address.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let contact = [lead.contact_name.as_deref(), lead.email.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        doc!(
            self.fields.lead_id => lead.id.to_string(),
            self.fields.name => lead.name.clone(),
            self.fields.category => lead.category.clone().unwrap_or_default(),
            self.fields.location => location,
            self.fields.notes => lead.notes.clone().unwrap_or_default(),
            self.fields.tags => lead.tags.join(" "),
            self.fields.contact => contact
        )
    }
}

/// Keep `index` in step with the store's change feed. A lagging follower
/// rebuilds from the full lead table.
pub fn spawn_index_sync(index: Arc<SearchIndex>, repo: Arc<Repository>) -> JoinHandle<()> {
    let mut rx = repo.subscribe();
    tokio::spawn(async move {
        loop {
            let result = match rx.recv().await {
                Ok(event) => match (event.event_type, &event.new, &event.old) {
                    (ChangeKind::Insert | ChangeKind::Update, Some(lead), _) => {
                        index.index_lead(lead).await
                    }
                    (ChangeKind::Delete, _, Some(old)) => {
                        index.remove_lead(&old.id.to_string()).await
                    }
                    _ => Ok(()),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Index sync lagged by {} events, rebuilding", skipped);
                    match repo.list_all_leads().await {
                        Ok(leads) => index.rebuild(&leads).await,
                        Err(e) => Err(e),
                    }
                }
                Err(RecvError::Closed) => break,
            };
            if let Err(e) = result {
                tracing::warn!("Failed to update search index: {}", e);
            }
        }
    })
}
