/// 为以小写文本存储的枚举实现 SQLite 的 Type/Encode/Decode
///
/// 枚举需要提供 `as_str()` 以及返回 `Option<Self>` 的 `parse_str()`。
macro_rules! impl_sqlite_text_enum {
    ($ty:ty, $label:literal) => {
        impl sqlx::Type<sqlx::Sqlite> for $ty {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <str as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $ty {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                <$ty>::parse_str(s).ok_or_else(|| format!("Invalid {}: {s}", $label).into())
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
            }
        }
    };
}

pub(crate) use impl_sqlite_text_enum;

pub mod queue_stats;
pub mod task;
pub mod task_log;
pub mod worker;

pub use queue_stats::QueueStats;
pub use task::{
    ListOrder, StateTransition, Task, TaskFilter, TaskPriority, TaskSpec, TaskStatus,
    TransitionFields,
};
pub use task_log::{TaskLog, TaskLogLevel};
pub use worker::{WorkerHeartbeat, WorkerInfo, WorkerRegistration, WorkerStatus};
