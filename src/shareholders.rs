// 👥 Shareholder registry
//
// Identity (UUID) is stable; holdings reference it.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{now_rfc3339, parse_timestamp};
use crate::error::{EquityError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HolderType {
    Founder,
    Employee,
    Investor,
    Advisor,
}

impl HolderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolderType::Founder => "founder",
            HolderType::Employee => "employee",
            HolderType::Investor => "investor",
            HolderType::Advisor => "advisor",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "founder" => Ok(HolderType::Founder),
            "employee" => Ok(HolderType::Employee),
            "investor" => Ok(HolderType::Investor),
            "advisor" => Ok(HolderType::Advisor),
            other => Err(EquityError::validation(format!("Unknown holder type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shareholder {
    pub id: String,
    pub name: String,
    pub holder_type: HolderType,
    pub email: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewShareholder {
    pub name: String,
    pub holder_type: HolderType,
    #[serde(default)]
    pub email: Option<String>,
}

/// Raw row; enum and timestamp columns are decoded outside the rusqlite closure
struct ShareholderRow {
    id: String,
    name: String,
    holder_type: String,
    email: Option<String>,
    status: String,
    created_at: String,
}

fn shareholder_from_row(row: &Row<'_>) -> rusqlite::Result<ShareholderRow> {
    Ok(ShareholderRow {
        id: row.get(0)?,
        name: row.get(1)?,
        holder_type: row.get(2)?,
        email: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl TryFrom<ShareholderRow> for Shareholder {
    type Error = EquityError;

    fn try_from(row: ShareholderRow) -> Result<Self> {
        Ok(Shareholder {
            holder_type: HolderType::parse(&row.holder_type)?,
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            name: row.name,
            email: row.email,
            status: row.status,
        })
    }
}

pub fn create_shareholder(conn: &Connection, new: &NewShareholder) -> Result<Shareholder> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(EquityError::validation("Shareholder name is required"));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let created_at = now_rfc3339();

    conn.execute(
        "INSERT INTO shareholders (id, name, holder_type, email, status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
        params![id, name, new.holder_type.as_str(), new.email, created_at],
    )?;

    info!(shareholder_id = %id, holder_type = new.holder_type.as_str(), "shareholder created");

    get_shareholder(conn, &id)
}

pub fn get_shareholder(conn: &Connection, id: &str) -> Result<Shareholder> {
    conn.query_row(
        "SELECT id, name, holder_type, email, status, created_at
         FROM shareholders WHERE id = ?1",
        [id],
        shareholder_from_row,
    )
    .optional()?
    .ok_or_else(|| EquityError::NotFound(format!("Shareholder {}", id)))?
    .try_into()
}

/// NotFound for unknown ids, Validation for inactive holders
pub fn require_active(conn: &Connection, id: &str) -> Result<Shareholder> {
    let holder = get_shareholder(conn, id)?;
    if holder.status != "active" {
        return Err(EquityError::validation(format!("Shareholder {} is not active", id)));
    }
    Ok(holder)
}

pub fn list_shareholders(conn: &Connection, holder_type: Option<HolderType>) -> Result<Vec<Shareholder>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, holder_type, email, status, created_at
         FROM shareholders
         WHERE ?1 IS NULL OR holder_type = ?1
         ORDER BY created_at, name",
    )?;

    let rows = stmt
        .query_map([holder_type.map(|t| t.as_str())], shareholder_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(Shareholder::try_from).collect()
}
