//! Bill item course repository
//!
//! Courses attached to a package charge, written as one batch per bill item.

use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection, PgExecutor};
use tracing::{debug, instrument};
use uuid::Uuid;

use domain_billing::BillItemCourse;

use crate::error::{expect_rows, DatabaseError, OperationContext};

macro_rules! course_columns {
    () => {
        "bill_item_sequence_number, course_id, course_name, course_weight, course_slot, created_at"
    };
}

/// Database row for `bill_item_course`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillItemCourseRow {
    pub bill_item_sequence_number: i32,
    pub course_id: Uuid,
    pub course_name: String,
    pub course_weight: Option<i32>,
    pub course_slot: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<BillItemCourseRow> for BillItemCourse {
    fn from(row: BillItemCourseRow) -> Self {
        Self {
            bill_item_sequence_number: row.bill_item_sequence_number,
            course_id: row.course_id.into(),
            course_name: row.course_name,
            course_weight: row.course_weight,
            course_slot: row.course_slot,
            created_at: row.created_at,
        }
    }
}

/// Stateless repository for bill item courses
#[derive(Debug, Clone, Copy, Default)]
pub struct BillItemCourseRepository;

impl BillItemCourseRepository {
    /// Inserts every course in one savepoint
    ///
    /// Each insert must affect exactly one row; the first failure rolls the
    /// whole batch back and is returned.
    #[instrument(skip(self, conn, courses), fields(count = courses.len()))]
    pub async fn multi_create(
        &self,
        conn: &mut PgConnection,
        courses: &[BillItemCourse],
    ) -> Result<(), DatabaseError> {
        const OP: &str = "BillItemCourse.multi_create";
        if courses.is_empty() {
            return Ok(());
        }

        let mut tx = conn.begin().await.during(OP)?;
        for course in courses {
            let result = sqlx::query(concat!(
                "INSERT INTO bill_item_course (",
                course_columns!(),
                ") VALUES ($1, $2, $3, $4, $5, $6)"
            ))
            .bind(course.bill_item_sequence_number)
            .bind(Uuid::from(course.course_id))
            .bind(&course.course_name)
            .bind(course.course_weight)
            .bind(course.course_slot)
            .bind(course.created_at)
            .execute(&mut *tx)
            .await
            .during(OP)?;

            expect_rows(OP, 1, result.rows_affected())?;
        }
        tx.commit().await.during(OP)?;

        debug!("Created bill item courses");
        Ok(())
    }

    pub async fn get_by_bill_item_sequence_number<'e, E>(
        &self,
        executor: E,
        sequence: i32,
    ) -> Result<Vec<BillItemCourse>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<BillItemCourseRow> = sqlx::query_as(concat!(
            "SELECT ",
            course_columns!(),
            " FROM bill_item_course WHERE bill_item_sequence_number = $1 ORDER BY course_name"
        ))
        .bind(sequence)
        .fetch_all(executor)
        .await
        .during("BillItemCourse.get_by_bill_item_sequence_number")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
