/// Vector similarity index
///
/// Embeddings are stored one row per parent id and compared with cosine
/// distance (`1 - cosine_similarity`), so smaller is more similar and
/// `similarity = 1 - distance`.

use anyhow::{anyhow, bail, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Upper bound on ids bound into one `IN (...)` list, below SQLite's
/// host parameter limit.
pub const MAX_BOUND_IDS: usize = 500;

/// One nearest-neighbor hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: i64,
    pub distance: f32,
}

impl Neighbor {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Distance-queryable embedding store keyed by parent row id
pub trait VectorIndex {
    fn insert(&self, id: i64, embedding: &[f32]) -> Result<()>;

    /// Up to `k` neighbors ordered by ascending distance, optionally bounded
    /// by `max_distance` (inclusive).
    fn query(&self, embedding: &[f32], k: usize, max_distance: Option<f32>)
        -> Result<Vec<Neighbor>>;
}

/// Vector table living in the same SQLite database as its parent table.
///
/// Borrowing a `Connection` lets the index take part in an open transaction
/// (a `rusqlite::Transaction` derefs to `Connection`).
pub struct SqliteVectorIndex<'conn> {
    conn: &'conn Connection,
    table: &'static str,
}

impl<'conn> SqliteVectorIndex<'conn> {
    pub fn new(conn: &'conn Connection, table: &'static str) -> Self {
        Self { conn, table }
    }

    pub fn create_table(conn: &Connection, table: &str) -> Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    item_id INTEGER PRIMARY KEY,
                    embedding BLOB NOT NULL
                )",
                table
            ),
            [],
        )?;
        Ok(())
    }

    /// Bulk load embeddings for the given ids. Ids without a row, or whose
    /// blob does not decode, are absent from the map.
    pub fn get_many(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<f32>>> {
        let mut embeddings = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_BOUND_IDS) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let mut stmt = self.conn.prepare(&format!(
                "SELECT item_id, embedding FROM {} WHERE item_id IN ({})",
                self.table, placeholders
            ))?;

            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            for (id, blob) in rows {
                if let Some(embedding) = self.decode_row(id, &blob) {
                    embeddings.insert(id, embedding);
                }
            }
        }

        Ok(embeddings)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Undecodable rows are logged and treated as absent
    fn decode_row(&self, id: i64, blob: &[u8]) -> Option<Vec<f32>> {
        match decode_embedding(blob) {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!("Skipping corrupt embedding for {} row {}: {:#}", self.table, id, e);
                None
            }
        }
    }
}

impl VectorIndex for SqliteVectorIndex<'_> {
    fn insert(&self, id: i64, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            bail!("refusing to index an empty embedding for {} row {}", self.table, id);
        }

        self.conn.execute(
            &format!("INSERT INTO {} (item_id, embedding) VALUES (?1, ?2)", self.table),
            params![id, encode_embedding(embedding)],
        )?;

        debug!("Indexed embedding for {} row {}", self.table, id);
        Ok(())
    }

    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        max_distance: Option<f32>,
    ) -> Result<Vec<Neighbor>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT item_id, embedding FROM {} ORDER BY item_id",
            self.table
        ))?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let candidates = rows
            .into_iter()
            .filter_map(|(id, blob)| {
                self.decode_row(id, &blob).map(|stored| Neighbor {
                    id,
                    distance: cosine_distance(embedding, &stored),
                })
            })
            .collect();

        Ok(rank_neighbors(candidates, k, max_distance))
    }
}

// In-memory vector index for testing
pub struct InMemoryVectorIndex {
    embeddings: RwLock<HashMap<i64, Vec<f32>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            embeddings: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn insert(&self, id: i64, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            bail!("refusing to index an empty embedding for id {}", id);
        }
        self.embeddings
            .write()
            .map_err(|_| anyhow!("vector index lock poisoned"))?
            .insert(id, embedding.to_vec());
        Ok(())
    }

    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        max_distance: Option<f32>,
    ) -> Result<Vec<Neighbor>> {
        let embeddings = self
            .embeddings
            .read()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;

        let candidates = embeddings
            .iter()
            .map(|(id, stored)| Neighbor {
                id: *id,
                distance: cosine_distance(embedding, stored),
            })
            .collect();

        Ok(rank_neighbors(candidates, k, max_distance))
    }
}

/// Filter by `max_distance`, order by ascending distance (lower id first on
/// exact ties) and keep at most `k`.
fn rank_neighbors(
    mut candidates: Vec<Neighbor>,
    k: usize,
    max_distance: Option<f32>,
) -> Vec<Neighbor> {
    if let Some(max) = max_distance {
        candidates.retain(|n| n.distance <= max);
    }
    candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    candidates.truncate(k);
    candidates
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Little-endian f32 blob, the layout sqlite vector extensions use.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        bail!("invalid byte length {} for f32 conversion", blob.len());
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
