//! [`SqliteStore`], the SQLite implementation of [`ScheduleStore`].

use std::{collections::HashSet, path::Path};

use cadence_core::{
  collab::Booking,
  occurrence::{Occurrence, Transition},
  payment::ChargeStatus,
  series::{MAX_DURATION_MINUTES, Series, SeriesState},
  store::{ChargeRequest, Changeset, OutboxEntry, ScheduleStore, SeriesWrite, StaleWrite},
};
use chrono::{Duration, NaiveDateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    OCCURRENCE_COLUMNS, OccurrenceRow, RawOutboxEntry, SERIES_COLUMNS, SeriesRow, TransitionRow,
    decode_local, decode_uuid, encode_charge_status, encode_dt, encode_local, encode_target,
    encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Cadence schedule store backed by a single SQLite file.
///
/// Clones share one connection.
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

  /// Open an in-memory store for tests.
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
}

// ─── Write helpers ───────────────────────────────────────────────────────────
//
// These run inside the commit transaction. Each guarded write reports whether
// the row it expected was still there.

fn insert_series(conn: &rusqlite::Connection, r: &SeriesRow) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO series ({SERIES_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
               ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)"
    ),
    rusqlite::params![
      r.series_id,
      r.customer_id,
      r.staff_id,
      r.service_id,
      r.starts_at,
      r.timezone,
      r.duration_minutes,
      r.deposit_minor,
      r.payment_json,
      r.pattern_json,
      r.state,
      r.completed_count,
      r.skipped_count,
      r.cancelled_count,
      r.planned_count,
      r.last_materialized_seq,
      r.exhausted,
      r.next_occurrence_at,
      r.notes,
      r.tags,
      r.revision,
      r.created_at,
      r.updated_at,
    ],
  )?;
  Ok(())
}

/// Everything but the counters, guarded by revision.
fn update_series(conn: &rusqlite::Connection, r: &SeriesRow) -> rusqlite::Result<bool> {
  let n = conn.execute(
    "UPDATE series SET
       customer_id = ?2, staff_id = ?3, service_id = ?4, starts_at = ?5,
       timezone = ?6, duration_minutes = ?7, deposit_minor = ?8,
       payment_json = ?9, pattern_json = ?10, state = ?11,
       planned_count = ?12, last_materialized_seq = ?13, exhausted = ?14,
       next_occurrence_at = ?15, notes = ?16, tags = ?17, updated_at = ?18,
       revision = revision + 1
     WHERE series_id = ?1 AND revision = ?19",
    rusqlite::params![
      r.series_id,
      r.customer_id,
      r.staff_id,
      r.service_id,
      r.starts_at,
      r.timezone,
      r.duration_minutes,
      r.deposit_minor,
      r.payment_json,
      r.pattern_json,
      r.state,
      r.planned_count,
      r.last_materialized_seq,
      r.exhausted,
      r.next_occurrence_at,
      r.notes,
      r.tags,
      r.updated_at,
      r.revision,
    ],
  )?;
  Ok(n == 1)
}

/// Idempotent per `(series_id, sequence)`; returns whether a row was added.
fn insert_occurrence(conn: &rusqlite::Connection, r: &OccurrenceRow) -> rusqlite::Result<bool> {
  let n = conn.execute(
    &format!(
      "INSERT INTO occurrences ({OCCURRENCE_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
       ON CONFLICT (series_id, sequence) DO NOTHING"
    ),
    rusqlite::params![
      r.occurrence_id,
      r.series_id,
      r.sequence,
      r.scheduled_at,
      r.actual_at,
      r.state,
      r.amount_minor,
      r.payment_status,
      r.payment_reference,
      r.staff_override,
      r.conflict,
      r.conflicting_booking,
      r.reschedule_count,
      r.reminder_sent_at,
      r.transition_count,
      r.revision,
      r.created_at,
      r.updated_at,
    ],
  )?;
  Ok(n == 1)
}

fn update_occurrence(conn: &rusqlite::Connection, r: &OccurrenceRow) -> rusqlite::Result<bool> {
  let n = conn.execute(
    "UPDATE occurrences SET
       scheduled_at = ?2, actual_at = ?3, state = ?4, amount_minor = ?5,
       payment_status = ?6, payment_reference = ?7, staff_override = ?8,
       conflict = ?9, conflicting_booking = ?10, reschedule_count = ?11,
       reminder_sent_at = ?12, transition_count = ?13, updated_at = ?14,
       revision = revision + 1
     WHERE occurrence_id = ?1 AND revision = ?15",
    rusqlite::params![
      r.occurrence_id,
      r.scheduled_at,
      r.actual_at,
      r.state,
      r.amount_minor,
      r.payment_status,
      r.payment_reference,
      r.staff_override,
      r.conflict,
      r.conflicting_booking,
      r.reschedule_count,
      r.reminder_sent_at,
      r.transition_count,
      r.updated_at,
      r.revision,
    ],
  )?;
  Ok(n == 1)
}

fn insert_transition(conn: &rusqlite::Connection, r: &TransitionRow) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO occurrence_transitions
       (occurrence_id, transition_seq, from_state, to_state, actor, at, note)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    rusqlite::params![
      r.occurrence_id,
      r.transition_seq,
      r.from_state,
      r.to_state,
      r.actor,
      r.at,
      r.note,
    ],
  )?;
  Ok(())
}

// ─── ScheduleStore impl ──────────────────────────────────────────────────────

impl ScheduleStore for SqliteStore {
  type Error = Error;

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn commit(&self, changes: Changeset) -> Result<usize> {
    if changes.is_empty() {
      return Ok(0);
    }

    let series = match &changes.series {
      Some(SeriesWrite::Insert(s)) => Some((true, s.series_id, s.revision, SeriesRow::encode(s)?)),
      Some(SeriesWrite::Update(s)) => Some((false, s.series_id, s.revision, SeriesRow::encode(s)?)),
      None => None,
    };
    let progress = changes
      .progress
      .filter(|d| d.completed + d.skipped + d.cancelled > 0)
      .map(|d| (encode_uuid(d.series_id), d.completed, d.skipped, d.cancelled));
    let new_occurrences: Vec<OccurrenceRow> =
      changes.new_occurrences.iter().map(OccurrenceRow::encode).collect();
    let updated_occurrences: Vec<(Uuid, u32, OccurrenceRow)> = changes
      .updated_occurrences
      .iter()
      .map(|o| (o.occurrence_id, o.revision, OccurrenceRow::encode(o)))
      .collect();
    let transitions: Vec<TransitionRow> = changes
      .transitions
      .iter()
      .map(TransitionRow::encode)
      .collect::<Result<_>>()?;

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        if let Some((insert, id, revision, row)) = &series {
          if *insert {
            insert_series(&tx, row)?;
          } else if !update_series(&tx, row)? {
            return Ok(Err(StaleWrite { entity: "series", id: *id, expected: *revision }));
          }
        }

        if let Some((id, completed, skipped, cancelled)) = &progress {
          tx.execute(
            "UPDATE series SET
               completed_count = completed_count + ?2,
               skipped_count   = skipped_count + ?3,
               cancelled_count = cancelled_count + ?4
             WHERE series_id = ?1",
            rusqlite::params![id, completed, skipped, cancelled],
          )?;
        }

        let mut inserted = 0;
        let mut skipped_ids = HashSet::new();
        for row in &new_occurrences {
          if insert_occurrence(&tx, row)? {
            inserted += 1;
          } else {
            skipped_ids.insert(row.occurrence_id.clone());
          }
        }

        for (id, revision, row) in &updated_occurrences {
          if !update_occurrence(&tx, row)? {
            return Ok(Err(StaleWrite { entity: "occurrence", id: *id, expected: *revision }));
          }
        }

        for row in transitions.iter().filter(|t| !skipped_ids.contains(&t.occurrence_id)) {
          insert_transition(&tx, row)?;
        }

        tx.commit()?;
        Ok(Ok(inserted))
      })
      .await?;

    outcome.map_err(Error::Stale)
  }

  async fn enqueue_charge(&self, request: ChargeRequest) -> Result<i64> {
    let (kind, target_id) = encode_target(request.target);
    let at_str = encode_dt(Utc::now());
    let status = encode_charge_status(ChargeStatus::Pending);

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO payment_outbox (target_kind, target_id, amount_minor, currency, status, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![kind, target_id, request.amount_minor, request.currency, status, at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(id)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get_series(&self, id: Uuid) -> Result<Option<Series>> {
    let id_str = encode_uuid(id);

    let row: Option<SeriesRow> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {SERIES_COLUMNS} FROM series WHERE series_id = ?1"),
              rusqlite::params![id_str],
              SeriesRow::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    row.map(SeriesRow::into_series).transpose()
  }

  async fn list_series(&self, state: Option<SeriesState>) -> Result<Vec<Series>> {
    let state_str = state.map(|s| s.as_str().to_owned());

    let rows: Vec<SeriesRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SERIES_COLUMNS} FROM series
           WHERE ?1 IS NULL OR state = ?1
           ORDER BY created_at, series_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![state_str], SeriesRow::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(SeriesRow::into_series).collect()
  }

  async fn get_occurrence(&self, id: Uuid) -> Result<Option<Occurrence>> {
    let id_str = encode_uuid(id);

    let row: Option<OccurrenceRow> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {OCCURRENCE_COLUMNS} FROM occurrences WHERE occurrence_id = ?1"),
              rusqlite::params![id_str],
              OccurrenceRow::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    row.map(OccurrenceRow::into_occurrence).transpose()
  }

  async fn list_occurrences(&self, series_id: Uuid) -> Result<Vec<Occurrence>> {
    let id_str = encode_uuid(series_id);

    let rows: Vec<OccurrenceRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {OCCURRENCE_COLUMNS} FROM occurrences
           WHERE series_id = ?1
           ORDER BY sequence"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], OccurrenceRow::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(OccurrenceRow::into_occurrence).collect()
  }

  async fn transitions(&self, occurrence_id: Uuid) -> Result<Vec<Transition>> {
    let id_str = encode_uuid(occurrence_id);

    let rows: Vec<TransitionRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT occurrence_id, transition_seq, from_state, to_state, actor, at, note
           FROM occurrence_transitions
           WHERE occurrence_id = ?1
           ORDER BY transition_seq",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], TransitionRow::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(TransitionRow::into_transition).collect()
  }

  async fn staff_bookings(
    &self,
    staff_id: &str,
    from: NaiveDateTime,
    until: NaiveDateTime,
  ) -> Result<Vec<Booking>> {
    let staff = staff_id.to_owned();
    // Nothing lasts longer than a day, so earlier starts cannot reach `from`.
    let lower = encode_local(from - Duration::minutes(i64::from(MAX_DURATION_MINUTES)));
    let upper = encode_local(until);

    let raws: Vec<(String, String, String, u32)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT o.occurrence_id, o.series_id, o.scheduled_at, s.duration_minutes
           FROM occurrences o
           JOIN series s ON s.series_id = o.series_id
           WHERE COALESCE(o.staff_override, s.staff_id) = ?1
             AND o.state IN ('scheduled', 'rescheduled')
             AND o.scheduled_at >= ?2
             AND o.scheduled_at < ?3
           ORDER BY o.scheduled_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![staff, lower, upper], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut bookings = Vec::with_capacity(raws.len());
    for (occurrence_id, series_id, starts_at, duration_minutes) in raws {
      let booking = Booking {
        occurrence_id: decode_uuid(&occurrence_id)?,
        series_id: decode_uuid(&series_id)?,
        starts_at: decode_local(&starts_at)?,
        duration_minutes,
      };
      if booking.ends_at() > from {
        bookings.push(booking);
      }
    }
    Ok(bookings)
  }

  async fn due_reminders(&self, from: NaiveDateTime, until: NaiveDateTime) -> Result<Vec<Occurrence>> {
    let lower = encode_local(from);
    let upper = encode_local(until);

    let rows: Vec<OccurrenceRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {OCCURRENCE_COLUMNS} FROM occurrences
           WHERE state = 'scheduled'
             AND reminder_sent_at IS NULL
             AND scheduled_at >= ?1
             AND scheduled_at <= ?2
             AND series_id IN (SELECT series_id FROM series WHERE state = 'active')
           ORDER BY scheduled_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![lower, upper], OccurrenceRow::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(OccurrenceRow::into_occurrence).collect()
  }

  async fn outbox(&self, status: Option<ChargeStatus>) -> Result<Vec<OutboxEntry>> {
    let status_str = status.map(encode_charge_status);

    let raws: Vec<RawOutboxEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, target_kind, target_id, amount_minor, currency, status, created_at
           FROM payment_outbox
           WHERE ?1 IS NULL OR status = ?1
           ORDER BY id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![status_str], |row| {
            Ok(RawOutboxEntry {
              id:           row.get(0)?,
              target_kind:  row.get(1)?,
              target_id:    row.get(2)?,
              amount_minor: row.get(3)?,
              currency:     row.get(4)?,
              status:       row.get(5)?,
              created_at:   row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOutboxEntry::into_entry).collect()
  }
}
