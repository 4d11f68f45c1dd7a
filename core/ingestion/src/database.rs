use anyhow::{bail, Context, Result};
use chrono::Utc;
use idea_graph_indexing::{SqliteVectorIndex, VectorIndex, MAX_BOUND_IDS};
use idea_graph_schemas::{
    EntityKind, Idea, IdeaId, LinkKind, NewSourceItem, Problem, ProblemId, Product, ProductId,
    SourceItem, SourceItemId,
};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Vector table for source item embeddings, keyed by `source_items.id`
pub const VEC_SOURCE_ITEMS: &str = "vec_source_items";
/// Vector table for problem embeddings, keyed by `problems.int_id`
pub const VEC_PROBLEMS: &str = "vec_problems";

const SOURCE_ITEM_COLUMNS: &str = "id, source, source_item_id, title, content, author, url, score,
     analysis_result, categories, created_at, source_created_at, problem_id, idea_id, product_id";

/// The create shape shared by Problem, Idea and Product: one entity row,
/// its category rows and, for embedding-bearing kinds, one vector row.
pub trait CanonicalEntity {
    const KIND: EntityKind;

    fn entity_id(&self) -> &str;
    fn categories(&self) -> &[String];

    /// Insert the entity row and return its integer rowid.
    fn insert_row(&self, conn: &Connection) -> rusqlite::Result<i64>;
}

impl CanonicalEntity for Problem {
    const KIND: EntityKind = EntityKind::Problem;

    fn entity_id(&self) -> &str {
        &self.id.0
    }

    fn categories(&self) -> &[String] {
        &self.categories
    }

    fn insert_row(&self, conn: &Connection) -> rusqlite::Result<i64> {
        let pain_points = serde_json::to_string(&self.pain_points).map_err(json_error)?;
        conn.execute(
            "INSERT INTO problems (id, slug, title, description, pain_points, score,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.id.0,
                self.slug,
                self.title,
                self.description,
                pain_points,
                self.score,
                self.created_at,
                self.updated_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

impl CanonicalEntity for Idea {
    const KIND: EntityKind = EntityKind::Idea;

    fn entity_id(&self) -> &str {
        &self.id.0
    }

    fn categories(&self) -> &[String] {
        &self.categories
    }

    fn insert_row(&self, conn: &Connection) -> rusqlite::Result<i64> {
        let features = serde_json::to_string(&self.features).map_err(json_error)?;
        let references = serde_json::to_string(&self.references).map_err(json_error)?;
        conn.execute(
            "INSERT INTO ideas (id, slug, title, description, features, reference_urls, score,
                                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.id.0,
                self.slug,
                self.title,
                self.description,
                features,
                references,
                self.score,
                self.created_at,
                self.updated_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

impl CanonicalEntity for Product {
    const KIND: EntityKind = EntityKind::Product;

    fn entity_id(&self) -> &str {
        &self.id.0
    }

    fn categories(&self) -> &[String] {
        &self.categories
    }

    fn insert_row(&self, conn: &Connection) -> rusqlite::Result<i64> {
        conn.execute(
            "INSERT INTO products (id, slug, name, description, url, score, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.id.0,
                self.slug,
                self.name,
                self.description,
                self.url,
                self.score,
                self.created_at,
                self.updated_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn entity_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Problem => "problems",
        EntityKind::Idea => "ideas",
        EntityKind::Product => "products",
    }
}

/// (join table, foreign key column)
fn category_table(kind: EntityKind) -> (&'static str, &'static str) {
    match kind {
        EntityKind::Problem => ("problem_categories", "problem_id"),
        EntityKind::Idea => ("idea_categories", "idea_id"),
        EntityKind::Product => ("product_categories", "product_id"),
    }
}

fn vector_table(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Problem => Some(VEC_PROBLEMS),
        EntityKind::Idea | EntityKind::Product => None,
    }
}

fn back_link_column(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Problem => "problem_id",
        EntityKind::Idea => "idea_id",
        EntityKind::Product => "product_id",
    }
}

/// (table, left column, right column)
fn link_table(kind: LinkKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        LinkKind::ProblemIdea => ("problem_idea", "problem_id", "idea_id"),
        LinkKind::ProblemProduct => ("problem_product", "problem_id", "product_id"),
        LinkKind::IdeaProduct => ("idea_product", "idea_id", "product_id"),
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the store and make sure every table exists
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open database at {}", path.as_ref().display()))?;

        let db = Self { conn };
        db.init_schema()?;

        info!("Database initialized");
        Ok(db)
    }

    /// Create all tables and indexes
    fn init_schema(&self) -> Result<()> {
        // Raw feed documents (append-only apart from back-links)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS source_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                source_item_id TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL DEFAULT '',
                score INTEGER NOT NULL DEFAULT 0,
                analysis_result TEXT NOT NULL,
                categories TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                source_created_at TEXT NOT NULL,
                problem_id TEXT,
                idea_id TEXT,
                product_id TEXT,
                UNIQUE (source, source_item_id)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_source_items_links
             ON source_items(problem_id, idea_id, product_id)",
            [],
        )?;

        // === CANONICAL ENTITIES ===

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS problems (
                int_id INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                slug TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                pain_points TEXT NOT NULL DEFAULT '[]',
                score INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS ideas (
                int_id INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                slug TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                features TEXT NOT NULL DEFAULT '[]',
                reference_urls TEXT NOT NULL DEFAULT '[]',
                score INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS products (
                int_id INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                slug TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                url TEXT NOT NULL DEFAULT '',
                score INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        for kind in [EntityKind::Problem, EntityKind::Idea, EntityKind::Product] {
            let (table, fk) = category_table(kind);
            self.conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        {fk} TEXT NOT NULL,
                        category_slug TEXT NOT NULL
                    )"
                ),
                [],
            )?;
            self.conn.execute(
                &format!("CREATE INDEX IF NOT EXISTS idx_{table}_{fk} ON {table}({fk})"),
                [],
            )?;
        }

        // === LINK TABLES (duplicates tolerated) ===

        for kind in [LinkKind::ProblemIdea, LinkKind::ProblemProduct, LinkKind::IdeaProduct] {
            let (table, left, right) = link_table(kind);
            self.conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        {left} TEXT NOT NULL,
                        {right} TEXT NOT NULL,
                        created_at TEXT NOT NULL
                    )"
                ),
                [],
            )?;
        }

        // === VECTOR TABLES ===

        SqliteVectorIndex::create_table(&self.conn, VEC_SOURCE_ITEMS)?;
        SqliteVectorIndex::create_table(&self.conn, VEC_PROBLEMS)?;

        Ok(())
    }

    // ========================================================================
    // Source items
    // ========================================================================

    /// Ingestion gate: has this natural key been stored already?
    pub fn source_item_exists(&self, source: &str, source_item_id: &str) -> Result<bool> {
        if source.trim().is_empty() || source_item_id.trim().is_empty() {
            bail!("source and source item id must be non-empty");
        }

        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM source_items WHERE source = ?1 AND source_item_id = ?2",
            params![source, source_item_id],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    /// Store a source item together with its embedding in one transaction.
    ///
    /// Returns `None` when `(source, source_item_id)` already exists; nothing
    /// is written in that case.
    pub fn insert_source_item(
        &self,
        item: &NewSourceItem,
        embedding: &[f32],
    ) -> Result<Option<SourceItemId>> {
        let tx = self.conn.unchecked_transaction()?;

        let inserted = tx.execute(
            "INSERT INTO source_items (source, source_item_id, title, content, author, url,
                                       score, analysis_result, categories, created_at,
                                       source_created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(source, source_item_id) DO NOTHING",
            params![
                item.source,
                item.source_item_id,
                item.title,
                item.content,
                item.author,
                item.url,
                item.score,
                item.analysis_result,
                item.categories,
                Utc::now().to_rfc3339(),
                item.source_created_at,
            ],
        )?;

        if inserted == 0 {
            debug!(
                "Source item {}/{} already stored",
                item.source, item.source_item_id
            );
            return Ok(None);
        }

        let id = tx.last_insert_rowid();
        SqliteVectorIndex::new(&tx, VEC_SOURCE_ITEMS).insert(id, embedding)?;
        tx.commit()?;

        debug!("Inserted source item {} ({}/{})", id, item.source, item.source_item_id);
        Ok(Some(SourceItemId(id)))
    }

    pub fn get_source_item(&self, id: SourceItemId) -> Result<Option<SourceItem>> {
        let item = self
            .conn
            .query_row(
                &format!("SELECT {} FROM source_items WHERE id = ?1", SOURCE_ITEM_COLUMNS),
                params![id.0],
                row_to_source_item,
            )
            .optional()?;

        Ok(item)
    }

    /// Items with none of the three back-links set, in insertion order
    pub fn get_ungrouped_source_items(&self) -> Result<Vec<SourceItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM source_items
             WHERE problem_id IS NULL AND idea_id IS NULL AND product_id IS NULL
             ORDER BY id",
            SOURCE_ITEM_COLUMNS
        ))?;

        let items = stmt
            .query_map([], row_to_source_item)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    /// Bulk load source item embeddings. Items without one are absent.
    pub fn get_source_item_embeddings(
        &self,
        ids: &[SourceItemId],
    ) -> Result<HashMap<SourceItemId, Vec<f32>>> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let embeddings = self.source_item_index().get_many(&raw_ids)?;

        Ok(embeddings
            .into_iter()
            .map(|(id, embedding)| (SourceItemId(id), embedding))
            .collect())
    }

    pub fn source_item_index(&self) -> SqliteVectorIndex<'_> {
        SqliteVectorIndex::new(&self.conn, VEC_SOURCE_ITEMS)
    }

    pub fn problem_index(&self) -> SqliteVectorIndex<'_> {
        SqliteVectorIndex::new(&self.conn, VEC_PROBLEMS)
    }

    pub fn set_problem_link(&self, ids: &[SourceItemId], problem_id: &ProblemId) -> Result<usize> {
        self.set_back_link(EntityKind::Problem, ids, &problem_id.0)
    }

    pub fn set_idea_link(&self, ids: &[SourceItemId], idea_id: &IdeaId) -> Result<usize> {
        self.set_back_link(EntityKind::Idea, ids, &idea_id.0)
    }

    pub fn set_product_link(&self, ids: &[SourceItemId], product_id: &ProductId) -> Result<usize> {
        self.set_back_link(EntityKind::Product, ids, &product_id.0)
    }

    /// Set one back-link column on many items in one transaction.
    /// Columns that are already set are left untouched.
    fn set_back_link(&self, kind: EntityKind, ids: &[SourceItemId], target: &str) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        if target.is_empty() {
            bail!("cannot link source items to an empty {} id", kind);
        }

        let column = back_link_column(kind);
        let tx = self.conn.unchecked_transaction()?;
        let mut updated = 0;

        for chunk in ids.chunks(MAX_BOUND_IDS) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let query = format!(
                "UPDATE source_items SET {column} = ? WHERE {column} IS NULL AND id IN ({placeholders})"
            );

            let mut args: Vec<rusqlite::types::Value> = Vec::with_capacity(chunk.len() + 1);
            args.push(target.to_string().into());
            args.extend(chunk.iter().map(|id| id.0.into()));

            updated += tx.execute(&query, params_from_iter(args))?;
        }
        tx.commit()?;

        debug!("Linked {} source items to {} {}", updated, kind, target);
        Ok(updated)
    }

    // ========================================================================
    // Canonical entities
    // ========================================================================

    /// Write an entity, its categories and (optionally) its embedding as one
    /// atomic unit. Returns the entity's integer rowid.
    pub fn create_entity<E: CanonicalEntity>(
        &self,
        entity: &E,
        embedding: Option<&[f32]>,
    ) -> Result<i64> {
        let kind = E::KIND;
        let tx = self.conn.unchecked_transaction()?;

        let rowid = entity
            .insert_row(&tx)
            .with_context(|| format!("failed to insert {}", kind))?;

        let (table, fk) = category_table(kind);
        for category in entity.categories() {
            tx.execute(
                &format!("INSERT INTO {table} ({fk}, category_slug) VALUES (?1, ?2)"),
                params![entity.entity_id(), category],
            )
            .with_context(|| format!("failed to insert {} category", kind))?;
        }

        match (vector_table(kind), embedding) {
            (Some(table), Some(embedding)) => {
                SqliteVectorIndex::new(&tx, table)
                    .insert(rowid, embedding)
                    .with_context(|| format!("failed to insert {} embedding", kind))?;
            }
            (None, Some(_)) => bail!("{} entities do not carry embeddings", kind),
            (_, None) => {}
        }

        tx.commit()?;

        debug!("Created {} {} (row {})", kind, entity.entity_id(), rowid);
        Ok(rowid)
    }

    /// Problems whose embedding lies within `max_distance`, nearest first
    pub fn find_similar_problems(
        &self,
        embedding: &[f32],
        limit: usize,
        max_distance: f32,
    ) -> Result<Vec<(Problem, f32)>> {
        let neighbors = self.problem_index().query(embedding, limit, Some(max_distance))?;

        let mut problems = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            match self.get_problem_by_rowid(neighbor.id)? {
                Some(problem) => problems.push((problem, neighbor.distance)),
                None => debug!("Dangling problem vector row {}", neighbor.id),
            }
        }

        Ok(problems)
    }

    pub fn get_problem(&self, id: &ProblemId) -> Result<Option<Problem>> {
        self.query_problem("id = ?1", params![id.0])
    }

    fn get_problem_by_rowid(&self, rowid: i64) -> Result<Option<Problem>> {
        self.query_problem("int_id = ?1", params![rowid])
    }

    fn query_problem(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Option<Problem>> {
        let problem = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, slug, title, description, pain_points, score, created_at, updated_at
                     FROM problems WHERE {}",
                    filter
                ),
                args,
                |row| {
                    let pain_points: String = row.get(4)?;
                    Ok(Problem {
                        id: ProblemId(row.get(0)?),
                        slug: row.get(1)?,
                        title: row.get(2)?,
                        description: row.get(3)?,
                        pain_points: serde_json::from_str(&pain_points).map_err(json_error)?,
                        categories: Vec::new(),
                        score: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?;

        match problem {
            Some(mut problem) => {
                problem.categories = self.get_categories(EntityKind::Problem, &problem.id.0)?;
                Ok(Some(problem))
            }
            None => Ok(None),
        }
    }

    pub fn get_idea(&self, id: &IdeaId) -> Result<Option<Idea>> {
        let idea = self
            .conn
            .query_row(
                "SELECT id, slug, title, description, features, reference_urls, score,
                        created_at, updated_at
                 FROM ideas WHERE id = ?1",
                params![id.0],
                |row| {
                    let features: String = row.get(4)?;
                    let references: String = row.get(5)?;
                    Ok(Idea {
                        id: IdeaId(row.get(0)?),
                        slug: row.get(1)?,
                        title: row.get(2)?,
                        description: row.get(3)?,
                        features: serde_json::from_str(&features).map_err(json_error)?,
                        categories: Vec::new(),
                        references: serde_json::from_str(&references).map_err(json_error)?,
                        score: row.get(6)?,
                        created_at: row.get(7)?,
                        updated_at: row.get(8)?,
                    })
                },
            )
            .optional()?;

        match idea {
            Some(mut idea) => {
                idea.categories = self.get_categories(EntityKind::Idea, &idea.id.0)?;
                Ok(Some(idea))
            }
            None => Ok(None),
        }
    }

    pub fn get_product(&self, id: &ProductId) -> Result<Option<Product>> {
        let product = self
            .conn
            .query_row(
                "SELECT id, slug, name, description, url, score, created_at, updated_at
                 FROM products WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(Product {
                        id: ProductId(row.get(0)?),
                        slug: row.get(1)?,
                        name: row.get(2)?,
                        description: row.get(3)?,
                        url: row.get(4)?,
                        categories: Vec::new(),
                        score: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?;

        match product {
            Some(mut product) => {
                product.categories = self.get_categories(EntityKind::Product, &product.id.0)?;
                Ok(Some(product))
            }
            None => Ok(None),
        }
    }

    /// Category rows of one entity in insertion order
    pub fn get_categories(&self, kind: EntityKind, entity_id: &str) -> Result<Vec<String>> {
        let (table, fk) = category_table(kind);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT category_slug FROM {table} WHERE {fk} = ?1 ORDER BY rowid"
        ))?;

        let categories = stmt
            .query_map(params![entity_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(categories)
    }

    pub fn count_entities(&self, kind: EntityKind) -> Result<usize> {
        self.count(entity_table(kind))
    }

    pub fn count_categories(&self, kind: EntityKind) -> Result<usize> {
        self.count(category_table(kind).0)
    }

    // ========================================================================
    // Links
    // ========================================================================

    /// Insert one link row. Returns `false` (and writes nothing) when either
    /// endpoint is empty.
    pub fn create_link(&self, kind: LinkKind, left: &str, right: &str) -> Result<bool> {
        if left.is_empty() || right.is_empty() {
            return Ok(false);
        }

        let (table, left_col, right_col) = link_table(kind);
        self.conn.execute(
            &format!(
                "INSERT INTO {table} ({left_col}, {right_col}, created_at) VALUES (?1, ?2, ?3)"
            ),
            params![left, right, Utc::now().to_rfc3339()],
        )?;

        debug!("Linked {} -> {} ({})", left, right, table);
        Ok(true)
    }

    pub fn count_links(&self, kind: LinkKind) -> Result<usize> {
        self.count(link_table(kind).0)
    }

    // ========================================================================
    // Stats
    // ========================================================================

    pub fn count_source_items(&self) -> Result<usize> {
        self.count("source_items")
    }

    pub fn count_ungrouped_source_items(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM source_items
             WHERE problem_id IS NULL AND idea_id IS NULL AND product_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            source_items: self.count_source_items()?,
            ungrouped_source_items: self.count_ungrouped_source_items()?,
            problems: self.count_entities(EntityKind::Problem)?,
            ideas: self.count_entities(EntityKind::Idea)?,
            products: self.count_entities(EntityKind::Product)?,
            problem_idea_links: self.count_links(LinkKind::ProblemIdea)?,
            problem_product_links: self.count_links(LinkKind::ProblemProduct)?,
            idea_product_links: self.count_links(LinkKind::IdeaProduct)?,
        })
    }

    fn count(&self, table: &str) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn row_to_source_item(row: &Row) -> rusqlite::Result<SourceItem> {
    Ok(SourceItem {
        id: SourceItemId(row.get(0)?),
        source: row.get(1)?,
        source_item_id: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        author: row.get(5)?,
        url: row.get(6)?,
        score: row.get(7)?,
        analysis_result: row.get(8)?,
        categories: row.get(9)?,
        created_at: row.get(10)?,
        source_created_at: row.get(11)?,
        problem_id: row.get::<_, Option<String>>(12)?.map(ProblemId),
        idea_id: row.get::<_, Option<String>>(13)?.map(IdeaId),
        product_id: row.get::<_, Option<String>>(14)?.map(ProductId),
    })
}

fn json_error(err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub source_items: usize,
    pub ungrouped_source_items: usize,
    pub problems: usize,
    pub ideas: usize,
    pub products: usize,
    pub problem_idea_links: usize,
    pub problem_product_links: usize,
    pub idea_product_links: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use idea_graph_schemas::{generate_idea_id, generate_problem_id};
    use tempfile::NamedTempFile;

    fn new_item(key: &str) -> NewSourceItem {
        NewSourceItem {
            source: "reddit".to_string(),
            source_item_id: key.to_string(),
            title: format!("Post {}", key),
            content: "Body".to_string(),
            author: "someone".to_string(),
            url: format!("https://reddit.com/{}", key),
            score: 12,
            analysis_result: "{}".to_string(),
            categories: "saas, ai".to_string(),
            source_created_at: Utc::now().to_rfc3339(),
        }
    }

    fn problem(title: &str) -> Problem {
        let now = Utc::now().to_rfc3339();
        Problem {
            id: generate_problem_id(),
            slug: title.to_lowercase().replace(' ', "-"),
            title: title.to_string(),
            description: "desc".to_string(),
            pain_points: vec!["slow".to_string(), "costly".to_string()],
            categories: vec!["saas".to_string(), "finance".to_string()],
            score: 60,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn test_database_creation() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.source_items, 0);
        assert_eq!(stats.problems, 0);
        assert_eq!(stats.idea_product_links, 0);
    }

    #[test]
    fn test_source_item_insert_is_idempotent() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        assert!(!db.source_item_exists("reddit", "abc").unwrap());

        let first = db.insert_source_item(&new_item("abc"), &[1.0, 0.0]).unwrap();
        assert!(first.is_some());
        assert!(db.source_item_exists("reddit", "abc").unwrap());

        let second = db.insert_source_item(&new_item("abc"), &[0.0, 1.0]).unwrap();
        assert!(second.is_none());
        assert_eq!(db.count_source_items().unwrap(), 1);
        assert_eq!(db.source_item_index().count().unwrap(), 1);

        let stored = db.get_source_item(first.unwrap()).unwrap().unwrap();
        assert_eq!(stored.title, "Post abc");
        assert!(stored.is_ungrouped());
    }

    #[test]
    fn test_exists_rejects_empty_keys() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        assert!(db.source_item_exists("", "abc").is_err());
        assert!(db.source_item_exists("reddit", " ").is_err());
    }

    #[test]
    fn test_source_item_without_embedding_is_rolled_back() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        assert!(db.insert_source_item(&new_item("abc"), &[]).is_err());
        assert_eq!(db.count_source_items().unwrap(), 0);
    }

    #[test]
    fn test_back_link_is_write_once() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let a = db.insert_source_item(&new_item("a"), &[1.0, 0.0]).unwrap().unwrap();
        let b = db.insert_source_item(&new_item("b"), &[0.0, 1.0]).unwrap().unwrap();

        assert_eq!(db.set_idea_link(&[], &generate_idea_id()).unwrap(), 0);

        let first = generate_idea_id();
        assert_eq!(db.set_idea_link(&[a], &first).unwrap(), 1);

        let ungrouped = db.get_ungrouped_source_items().unwrap();
        assert_eq!(ungrouped.len(), 1);
        assert_eq!(ungrouped[0].id, b);

        // A second assignment must not overwrite the first
        assert_eq!(db.set_idea_link(&[a, b], &generate_idea_id()).unwrap(), 1);
        let stored = db.get_source_item(a).unwrap().unwrap();
        assert_eq!(stored.idea_id, Some(first));
        assert!(db.get_ungrouped_source_items().unwrap().is_empty());
    }

    #[test]
    fn test_back_link_batches_beyond_parameter_limit() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let a = db.insert_source_item(&new_item("a"), &[1.0, 0.0]).unwrap().unwrap();
        let b = db.insert_source_item(&new_item("b"), &[0.0, 1.0]).unwrap().unwrap();

        let mut ids: Vec<SourceItemId> = (1_000..41_000).map(SourceItemId).collect();
        ids.push(b);
        ids.insert(0, a);

        assert_eq!(db.set_idea_link(&ids, &generate_idea_id()).unwrap(), 2);
        assert!(db.get_ungrouped_source_items().unwrap().is_empty());
        assert_eq!(db.get_source_item_embeddings(&ids).unwrap().len(), 2);
    }

    #[test]
    fn test_bulk_embedding_load() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let a = db.insert_source_item(&new_item("a"), &[1.0, 0.0]).unwrap().unwrap();
        let embeddings = db
            .get_source_item_embeddings(&[a, SourceItemId(999)])
            .unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[&a], vec![1.0, 0.0]);
    }

    #[test]
    fn test_create_problem_with_embedding() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let problem = problem("Invoices get lost");
        db.create_entity(&problem, Some(&[1.0, 0.0])).unwrap();

        let stored = db.get_problem(&problem.id).unwrap().unwrap();
        assert_eq!(stored.title, "Invoices get lost");
        assert_eq!(stored.pain_points, vec!["slow", "costly"]);
        assert_eq!(stored.categories, vec!["saas", "finance"]);

        let similar = db.find_similar_problems(&[0.99, 0.05], 1, 0.2).unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].0.id, problem.id);

        assert!(db.find_similar_problems(&[0.0, 1.0], 1, 0.2).unwrap().is_empty());
    }

    #[test]
    fn test_failed_entity_creation_rolls_back() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        // An empty embedding fails the vector insert after the row and categories
        let problem = problem("Orphan check");
        assert!(db.create_entity(&problem, Some(&[])).is_err());

        assert_eq!(db.count_entities(EntityKind::Problem).unwrap(), 0);
        assert_eq!(db.count_categories(EntityKind::Problem).unwrap(), 0);
        assert_eq!(db.problem_index().count().unwrap(), 0);
    }

    #[test]
    fn test_idea_rejects_embedding() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let now = Utc::now().to_rfc3339();
        let idea = Idea {
            id: generate_idea_id(),
            slug: "idea".into(),
            title: "Idea".into(),
            description: String::new(),
            features: vec![],
            categories: vec!["ai".into()],
            references: vec!["https://reddit.com/x".into()],
            score: 10,
            created_at: now.clone(),
            updated_at: now,
        };

        assert!(db.create_entity(&idea, Some(&[1.0])).is_err());
        assert_eq!(db.count_entities(EntityKind::Idea).unwrap(), 0);

        db.create_entity(&idea, None).unwrap();
        let stored = db.get_idea(&idea.id).unwrap().unwrap();
        assert_eq!(stored.references, vec!["https://reddit.com/x"]);
        assert_eq!(stored.categories, vec!["ai"]);
    }

    #[test]
    fn test_links_require_both_endpoints() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        assert!(!db.create_link(LinkKind::ProblemIdea, "", "idea_1").unwrap());
        assert!(!db.create_link(LinkKind::ProblemIdea, "prob_1", "").unwrap());
        assert!(db.create_link(LinkKind::ProblemIdea, "prob_1", "idea_1").unwrap());
        // Re-linking is tolerated
        assert!(db.create_link(LinkKind::ProblemIdea, "prob_1", "idea_1").unwrap());

        assert_eq!(db.count_links(LinkKind::ProblemIdea).unwrap(), 2);
        assert_eq!(db.count_links(LinkKind::ProblemProduct).unwrap(), 0);
    }
}
