//! [`SqliteStore`] — the SQLite implementation of [`PriceStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use tianguis_core::{
  catalog::{Product, Retailer, RelevanceTier},
  observation::{Classification, HotMark, NewObservation, PriceObservation},
  projection::ProjectionRecord,
  run::Run,
  store::{KeyCursor, ObservationFilter, PriceStore},
};

use crate::{
  encode::{
    encode_dt, encode_uuid, RawObservation, RawProduct, RawProjection,
    RawRetailer, RawRun,
  },
  schema::SCHEMA,
  Error, Result,
};

const OBSERVATION_COLUMNS: &str = "price_id, run_id, product_id, retailer_id, \
   price, currency, classification, is_hot, hotness_score, source_url, \
   recorded_at";

const PROJECTION_COLUMNS: &str = "price_id, run_id, product_id, retailer_id, \
   price, product_url, is_hot, hotness_score, brand, model, color_variant, \
   ram_variant, rom_variant, variant_rank, os, retailer_name";

fn observation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawObservation> {
  Ok(RawObservation {
    price_id:       row.get(0)?,
    run_id:         row.get(1)?,
    product_id:     row.get(2)?,
    retailer_id:    row.get(3)?,
    price:          row.get(4)?,
    currency:       row.get(5)?,
    classification: row.get(6)?,
    is_hot:         row.get(7)?,
    hotness_score:  row.get(8)?,
    source_url:     row.get(9)?,
    recorded_at:    row.get(10)?,
  })
}

fn projection_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawProjection> {
  Ok(RawProjection {
    price_id:      row.get(0)?,
    run_id:        row.get(1)?,
    product_id:    row.get(2)?,
    retailer_id:   row.get(3)?,
    price:         row.get(4)?,
    product_url:   row.get(5)?,
    is_hot:        row.get(6)?,
    hotness_score: row.get(7)?,
    brand:         row.get(8)?,
    model:         row.get(9)?,
    color_variant: row.get(10)?,
    ram_variant:   row.get(11)?,
    rom_variant:   row.get(12)?,
    variant_rank:  row.get(13)?,
    os:            row.get(14)?,
    retailer_name: row.get(15)?,
  })
}

fn product_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawProduct> {
  Ok(RawProduct {
    product_id:    row.get(0)?,
    brand:         row.get(1)?,
    model:         row.get(2)?,
    color_variant: row.get(3)?,
    ram_variant:   row.get(4)?,
    rom_variant:   row.get(5)?,
    variant_rank:  row.get(6)?,
    os:            row.get(7)?,
    condition:     row.get(8)?,
    search_query:  row.get(9)?,
    is_active:     row.get(10)?,
  })
}

/// Comma-separated `?` placeholders for a dynamic IN list.
fn placeholders(n: usize) -> String {
  let mut s = String::with_capacity(n * 2);
  for i in 0..n {
    if i > 0 {
      s.push(',');
    }
    s.push('?');
  }
  s
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tianguis price store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert a catalog product. Used by ingestion setup and tests; the
  /// pipeline itself treats products as read-only reference data.
  pub async fn insert_product(&self, product: &Product) -> Result<()> {
    let p = product.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO products (
             product_id, brand, model, color_variant, ram_variant,
             rom_variant, variant_rank, os, condition, search_query, is_active
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
          rusqlite::params![
            p.product_id,
            p.brand,
            p.model,
            p.color_variant,
            p.ram_variant,
            p.rom_variant,
            p.variant_rank,
            p.os,
            p.condition.to_string(),
            p.search_query,
            p.is_active,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── PriceStore impl ─────────────────────────────────────────────────────────

impl PriceStore for SqliteStore {
  type Error = Error;

  // ── Runs ──────────────────────────────────────────────────────────────────

  async fn begin_run(&self) -> Result<Run> {
    let run = Run { run_id: Uuid::new_v4(), started_at: Utc::now() };

    let id_str = encode_uuid(run.run_id);
    let at_str = encode_dt(run.started_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO runs (run_id, started_at) VALUES (?1, ?2)",
          rusqlite::params![id_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(run)
  }

  async fn latest_run(&self) -> Result<Option<Run>> {
    let raw: Option<RawRun> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT run_id, started_at FROM runs
               ORDER BY started_at DESC, run_id DESC LIMIT 1",
              [],
              |row| {
                Ok(RawRun { run_id: row.get(0)?, started_at: row.get(1)? })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRun::into_run).transpose()
  }

  // ── Observations ──────────────────────────────────────────────────────────

  async fn insert_observations(&self, batch: Vec<NewObservation>) -> Result<u64> {
    let now_str = encode_dt(Utc::now());

    let inserted: u64 = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut count = 0u64;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO prices (
               run_id, product_id, retailer_id, price, currency, source_url,
               recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          )?;
          for obs in &batch {
            stmt.execute(rusqlite::params![
              encode_uuid(obs.run_id),
              obs.product_id,
              obs.retailer_id,
              obs.price,
              obs.currency,
              obs.source_url,
              now_str,
            ])?;
            count += 1;
          }
        }
        tx.commit()?;
        Ok(count)
      })
      .await?;

    Ok(inserted)
  }

  async fn count_observations(&self, filter: &ObservationFilter) -> Result<u64> {
    let run_str = encode_uuid(filter.run_id);
    let class_str = filter.classification.map(|c| c.to_string());

    let count: i64 = self
      .conn
      .call(move |conn| {
        let n = if let Some(class) = class_str {
          conn.query_row(
            "SELECT COUNT(*) FROM prices WHERE run_id = ?1 AND classification = ?2",
            rusqlite::params![run_str, class],
            |row| row.get(0),
          )?
        } else {
          conn.query_row(
            "SELECT COUNT(*) FROM prices WHERE run_id = ?1",
            rusqlite::params![run_str],
            |row| row.get(0),
          )?
        };
        Ok(n)
      })
      .await?;

    Ok(count as u64)
  }

  async fn observations_after(
    &self,
    filter: &ObservationFilter,
    after: Option<i64>,
    limit: usize,
  ) -> Result<Vec<PriceObservation>> {
    let run_str = encode_uuid(filter.run_id);
    let class_str = filter.classification.map(|c| c.to_string());
    let after_id = after.unwrap_or(i64::MIN);
    let limit = limit as i64;

    let raws: Vec<RawObservation> = self
      .conn
      .call(move |conn| {
        let rows = if let Some(class) = class_str {
          let mut stmt = conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM prices
             WHERE run_id = ?1 AND classification = ?2 AND price_id > ?3
             ORDER BY price_id LIMIT ?4"
          ))?;
          stmt
            .query_map(
              rusqlite::params![run_str, class, after_id, limit],
              observation_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          let mut stmt = conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM prices
             WHERE run_id = ?1 AND price_id > ?2
             ORDER BY price_id LIMIT ?3"
          ))?;
          stmt
            .query_map(
              rusqlite::params![run_str, after_id, limit],
              observation_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawObservation::into_observation).collect()
  }

  async fn valid_observations_after(
    &self,
    run_id: Uuid,
    after: Option<KeyCursor>,
    limit: usize,
  ) -> Result<Vec<PriceObservation>> {
    let run_str = encode_uuid(run_id);
    let valid = Classification::Valid.to_string();
    let limit = limit as i64;

    let raws: Vec<RawObservation> = self
      .conn
      .call(move |conn| {
        let rows = if let Some(cursor) = after {
          let mut stmt = conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM prices
             WHERE run_id = ?1 AND classification = ?2
               AND product_id IS NOT NULL
               AND retailer_id IS NOT NULL
               AND price IS NOT NULL
               AND (product_id, retailer_id, price, price_id) > (?3, ?4, ?5, ?6)
             ORDER BY product_id, retailer_id, price, price_id
             LIMIT ?7"
          ))?;
          stmt
            .query_map(
              rusqlite::params![
                run_str,
                valid,
                cursor.product_id,
                cursor.retailer_id,
                cursor.price,
                cursor.price_id,
                limit,
              ],
              observation_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          let mut stmt = conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM prices
             WHERE run_id = ?1 AND classification = ?2
               AND product_id IS NOT NULL
               AND retailer_id IS NOT NULL
               AND price IS NOT NULL
             ORDER BY product_id, retailer_id, price, price_id
             LIMIT ?3"
          ))?;
          stmt
            .query_map(
              rusqlite::params![run_str, valid, limit],
              observation_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawObservation::into_observation).collect()
  }

  async fn update_classifications(
    &self,
    updates: &[(i64, Classification)],
  ) -> Result<()> {
    let updates: Vec<(i64, String)> = updates
      .iter()
      .map(|(id, class)| (*id, class.to_string()))
      .collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "UPDATE prices SET classification = ?2 WHERE price_id = ?1",
          )?;
          for (price_id, class) in &updates {
            stmt.execute(rusqlite::params![price_id, class])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn reset_hot_fields(&self, run_id: Uuid) -> Result<u64> {
    let run_str = encode_uuid(run_id);

    let changed = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "UPDATE prices SET is_hot = 0, hotness_score = NULL WHERE run_id = ?1",
          rusqlite::params![run_str],
        )?;
        Ok(n)
      })
      .await?;

    Ok(changed as u64)
  }

  async fn mark_hot(&self, marks: &[HotMark]) -> Result<()> {
    let marks = marks.to_vec();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "UPDATE prices SET is_hot = 1, hotness_score = ?2 WHERE price_id = ?1",
          )?;
          for mark in &marks {
            stmt.execute(rusqlite::params![mark.price_id, mark.score])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Reference data ────────────────────────────────────────────────────────

  async fn products_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    let ids = ids.to_vec();

    let raws: Vec<RawProduct> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT product_id, brand, model, color_variant, ram_variant,
                  rom_variant, variant_rank, os, condition, search_query,
                  is_active
           FROM products WHERE product_id IN ({})",
          placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(ids.iter()), product_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawProduct::into_product).collect()
  }

  async fn active_products(&self) -> Result<Vec<Product>> {
    let raws: Vec<RawProduct> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT product_id, brand, model, color_variant, ram_variant,
                  rom_variant, variant_rank, os, condition, search_query,
                  is_active
           FROM products WHERE is_active = 1 ORDER BY product_id",
        )?;
        let rows = stmt
          .query_map([], product_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawProduct::into_product).collect()
  }

  async fn retailers_by_ids(&self, ids: &[i64]) -> Result<Vec<Retailer>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    let ids = ids.to_vec();

    let raws: Vec<RawRetailer> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT retailer_id, retailer_name, tier, created_at
           FROM retailers WHERE retailer_id IN ({})",
          placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok(RawRetailer {
              retailer_id: row.get(0)?,
              name:        row.get(1)?,
              tier:        row.get(2)?,
              created_at:  row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRetailer::into_retailer).collect()
  }

  async fn list_retailers(&self) -> Result<Vec<Retailer>> {
    let raws: Vec<RawRetailer> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT retailer_id, retailer_name, tier, created_at
           FROM retailers ORDER BY retailer_id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawRetailer {
              retailer_id: row.get(0)?,
              name:        row.get(1)?,
              tier:        row.get(2)?,
              created_at:  row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRetailer::into_retailer).collect()
  }

  async fn insert_retailer(
    &self,
    name: &str,
    tier: RelevanceTier,
  ) -> Result<Retailer> {
    let created_at = Utc::now();
    let name_owned = name.to_owned();
    let tier_str = tier.to_string();
    let at_str = encode_dt(created_at);

    let retailer_id: i64 = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO retailers (retailer_name, tier, created_at)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![name_owned, tier_str, at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Retailer { retailer_id, name: name.to_owned(), tier, created_at })
  }

  // ── Projection ────────────────────────────────────────────────────────────

  async fn delete_projection_except(&self, run_id: Uuid) -> Result<u64> {
    let run_str = encode_uuid(run_id);

    let deleted = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "DELETE FROM projection WHERE run_id != ?1",
          rusqlite::params![run_str],
        )?;
        Ok(n)
      })
      .await?;

    Ok(deleted as u64)
  }

  async fn delete_projection_for_run(&self, run_id: Uuid) -> Result<u64> {
    let run_str = encode_uuid(run_id);

    let deleted = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "DELETE FROM projection WHERE run_id = ?1",
          rusqlite::params![run_str],
        )?;
        Ok(n)
      })
      .await?;

    Ok(deleted as u64)
  }

  async fn upsert_projection_batch(
    &self,
    batch: &[ProjectionRecord],
  ) -> Result<()> {
    let batch = batch.to_vec();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(UPSERT_PROJECTION_SQL)?;
          for rec in &batch {
            execute_projection_upsert(&mut stmt, rec)?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn insert_projection_row(&self, record: &ProjectionRecord) -> Result<()> {
    let rec = record.clone();

    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(UPSERT_PROJECTION_SQL)?;
        execute_projection_upsert(&mut stmt, &rec)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn count_projection(&self, run_id: Option<Uuid>) -> Result<u64> {
    let run_str = run_id.map(encode_uuid);

    let count: i64 = self
      .conn
      .call(move |conn| {
        let n = if let Some(run) = run_str {
          conn.query_row(
            "SELECT COUNT(*) FROM projection WHERE run_id = ?1",
            rusqlite::params![run],
            |row| row.get(0),
          )?
        } else {
          conn.query_row("SELECT COUNT(*) FROM projection", [], |row| row.get(0))?
        };
        Ok(n)
      })
      .await?;

    Ok(count as u64)
  }

  async fn projection_run_ids(&self) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT DISTINCT run_id FROM projection")?;
        let rows = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    ids
      .iter()
      .map(|s| Uuid::parse_str(s).map_err(Error::Uuid))
      .collect()
  }

  async fn projection_for_run(&self, run_id: Uuid) -> Result<Vec<ProjectionRecord>> {
    let run_str = encode_uuid(run_id);

    let raws: Vec<RawProjection> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {PROJECTION_COLUMNS} FROM projection
           WHERE run_id = ?1
           ORDER BY product_id, retailer_id, price"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![run_str], projection_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawProjection::into_record).collect()
  }
}

// ─── Projection write plumbing ───────────────────────────────────────────────

/// Idempotent per-row upsert: re-projecting the same `price_id` overwrites in
/// place, while a (run_id, product_id, retailer_id, price) collision between
/// *different* price_ids raises a constraint violation, which the reconciler
/// isolates via per-item fallback.
const UPSERT_PROJECTION_SQL: &str = "INSERT INTO projection (
     price_id, run_id, product_id, retailer_id, price, product_url,
     is_hot, hotness_score, brand, model, color_variant, ram_variant,
     rom_variant, variant_rank, os, retailer_name
   ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
   ON CONFLICT(price_id) DO UPDATE SET
     run_id        = excluded.run_id,
     product_id    = excluded.product_id,
     retailer_id   = excluded.retailer_id,
     price         = excluded.price,
     product_url   = excluded.product_url,
     is_hot        = excluded.is_hot,
     hotness_score = excluded.hotness_score,
     brand         = excluded.brand,
     model         = excluded.model,
     color_variant = excluded.color_variant,
     ram_variant   = excluded.ram_variant,
     rom_variant   = excluded.rom_variant,
     variant_rank  = excluded.variant_rank,
     os            = excluded.os,
     retailer_name = excluded.retailer_name";

fn execute_projection_upsert(
  stmt: &mut rusqlite::Statement<'_>,
  rec: &ProjectionRecord,
) -> rusqlite::Result<usize> {
  let run_str = encode_uuid(rec.run_id);
  stmt.execute(rusqlite::params![
    rec.price_id,
    run_str,
    rec.product_id,
    rec.retailer_id,
    rec.price,
    rec.product_url,
    rec.is_hot,
    rec.hotness_score,
    rec.brand,
    rec.model,
    rec.color_variant,
    rec.ram_variant,
    rec.rom_variant,
    rec.variant_rank,
    rec.os,
    rec.retailer_name,
  ])
}
