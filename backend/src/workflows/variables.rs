// Variable Resolution - turns an entity reference into the flat
// name -> value map used for template substitution.
//
// Every key a template can reference is always present; missing source
// data becomes an empty string so substitution never fails on absent data.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::triggers::EntityKind;
use crate::store::StoreError;

#[async_trait]
pub trait VariableSource: Send + Sync {
    /// Load the entity plus one level of related records and flatten them
    /// into template variables. Read-only.
    async fn resolve(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        owner_id: Uuid,
    ) -> Result<HashMap<String, String>, StoreError>;
}

pub struct PgVariableResolver {
    pool: PgPool,
}

impl PgVariableResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VariableSource for PgVariableResolver {
    async fn resolve(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        owner_id: Uuid,
    ) -> Result<HashMap<String, String>, StoreError> {
        match kind {
            EntityKind::Job => {
                let row: Option<(String, String, Option<DateTime<Utc>>, String, Option<String>, Option<String>, Option<String>, Option<String>)> =
                    sqlx::query_as(
                        r#"
                        SELECT j.title, j.status, j.scheduled_at,
                               c.name, c.company_name, c.email, c.phone, c.address
                        FROM jobs j
                        JOIN clients c ON c.id = j.client_id
                        WHERE j.id = $1 AND j.owner_id = $2
                        "#,
                    )
                    .bind(entity_id)
                    .bind(owner_id)
                    .fetch_optional(&self.pool)
                    .await?;

                let (title, status, scheduled_at, name, company, email, phone, address) =
                    row.ok_or_else(|| StoreError::NotFound(format!("job {}", entity_id)))?;

                Ok(job_variables(
                    entity_id,
                    &title,
                    &status,
                    scheduled_at,
                    &name,
                    company,
                    email,
                    phone,
                    address,
                ))
            }
            EntityKind::Client => {
                let row: Option<(String, Option<String>, Option<String>, Option<String>, Option<String>)> =
                    sqlx::query_as(
                        "SELECT name, company_name, email, phone, address FROM clients WHERE id = $1 AND owner_id = $2",
                    )
                    .bind(entity_id)
                    .bind(owner_id)
                    .fetch_optional(&self.pool)
                    .await?;

                let (name, company, email, phone, address) =
                    row.ok_or_else(|| StoreError::NotFound(format!("client {}", entity_id)))?;

                Ok(client_variables(entity_id, &name, company, email, phone, address))
            }
            EntityKind::Invoice => {
                let row: Option<(String, Decimal, String, Option<NaiveDate>, String, Option<String>, Option<String>, Option<String>, Option<String>)> =
                    sqlx::query_as(
                        r#"
                        SELECT i.invoice_number, i.amount, i.status, i.due_date,
                               c.name, c.company_name, c.email, c.phone, c.address
                        FROM invoices i
                        JOIN clients c ON c.id = i.client_id
                        WHERE i.id = $1 AND i.owner_id = $2
                        "#,
                    )
                    .bind(entity_id)
                    .bind(owner_id)
                    .fetch_optional(&self.pool)
                    .await?;

                let (number, amount, status, due_date, name, company, email, phone, address) =
                    row.ok_or_else(|| StoreError::NotFound(format!("invoice {}", entity_id)))?;

                Ok(invoice_variables(
                    entity_id, &number, amount, &status, due_date, &name, company, email, phone,
                    address,
                ))
            }
        }
    }
}

fn client_base(
    variables: &mut HashMap<String, String>,
    name: &str,
    company: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
) {
    variables.insert("client_name".to_string(), name.to_string());
    variables.insert("company_name".to_string(), company.unwrap_or_default());
    variables.insert("client_email".to_string(), email.unwrap_or_default());
    variables.insert("client_phone".to_string(), phone.unwrap_or_default());
    variables.insert("client_address".to_string(), address.unwrap_or_default());
}

pub fn job_variables(
    job_id: Uuid,
    title: &str,
    status: &str,
    scheduled_at: Option<DateTime<Utc>>,
    client_name: &str,
    company: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
) -> HashMap<String, String> {
    let mut variables = HashMap::new();
    variables.insert("entity_id".to_string(), job_id.to_string());
    variables.insert("job_title".to_string(), title.to_string());
    variables.insert("job_status".to_string(), status.to_string());
    variables.insert(
        "appointment_date".to_string(),
        scheduled_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default(),
    );
    client_base(&mut variables, client_name, company, email, phone, address);
    variables
}

pub fn client_variables(
    client_id: Uuid,
    name: &str,
    company: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
) -> HashMap<String, String> {
    let mut variables = HashMap::new();
    variables.insert("entity_id".to_string(), client_id.to_string());
    client_base(&mut variables, name, company, email, phone, address);
    variables
}

pub fn invoice_variables(
    invoice_id: Uuid,
    invoice_number: &str,
    amount: Decimal,
    status: &str,
    due_date: Option<NaiveDate>,
    client_name: &str,
    company: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
) -> HashMap<String, String> {
    let mut variables = HashMap::new();
    variables.insert("entity_id".to_string(), invoice_id.to_string());
    variables.insert("invoice_number".to_string(), invoice_number.to_string());
    variables.insert("amount".to_string(), amount.to_string());
    variables.insert("invoice_status".to_string(), status.to_string());
    variables.insert(
        "due_date".to_string(),
        due_date.map(|d| d.to_string()).unwrap_or_default(),
    );
    client_base(&mut variables, client_name, company, email, phone, address);
    variables
}
