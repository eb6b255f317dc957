//! Bill item account category repository

use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection, PgExecutor};
use tracing::{debug, instrument};
use uuid::Uuid;

use domain_billing::BillItemAccountCategory;

use crate::error::{expect_rows, DatabaseError, OperationContext};

macro_rules! account_category_columns {
    () => {
        "bill_item_sequence_number, accounting_category_id, created_at"
    };
}

/// Database row for `bill_item_account_category`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillItemAccountCategoryRow {
    pub bill_item_sequence_number: i32,
    pub accounting_category_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<BillItemAccountCategoryRow> for BillItemAccountCategory {
    fn from(row: BillItemAccountCategoryRow) -> Self {
        Self {
            bill_item_sequence_number: row.bill_item_sequence_number,
            accounting_category_id: row.accounting_category_id.into(),
            created_at: row.created_at,
        }
    }
}

/// Stateless repository for bill item account categories
#[derive(Debug, Clone, Copy, Default)]
pub struct BillItemAccountCategoryRepository;

impl BillItemAccountCategoryRepository {
    /// Inserts every category in one savepoint, all or nothing
    #[instrument(skip(self, conn, categories), fields(count = categories.len()))]
    pub async fn multi_create(
        &self,
        conn: &mut PgConnection,
        categories: &[BillItemAccountCategory],
    ) -> Result<(), DatabaseError> {
        const OP: &str = "BillItemAccountCategory.multi_create";
        if categories.is_empty() {
            return Ok(());
        }

        let mut tx = conn.begin().await.during(OP)?;
        for category in categories {
            let result = sqlx::query(concat!(
                "INSERT INTO bill_item_account_category (",
                account_category_columns!(),
                ") VALUES ($1, $2, $3)"
            ))
            .bind(category.bill_item_sequence_number)
            .bind(Uuid::from(category.accounting_category_id))
            .bind(category.created_at)
            .execute(&mut *tx)
            .await
            .during(OP)?;

            expect_rows(OP, 1, result.rows_affected())?;
        }
        tx.commit().await.during(OP)?;

        debug!("Created bill item account categories");
        Ok(())
    }

    pub async fn get_by_bill_item_sequence_number<'e, E>(
        &self,
        executor: E,
        sequence: i32,
    ) -> Result<Vec<BillItemAccountCategory>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<BillItemAccountCategoryRow> = sqlx::query_as(concat!(
            "SELECT ",
            account_category_columns!(),
            " FROM bill_item_account_category WHERE bill_item_sequence_number = $1 \
             ORDER BY accounting_category_id"
        ))
        .bind(sequence)
        .fetch_all(executor)
        .await
        .during("BillItemAccountCategory.get_by_bill_item_sequence_number")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
