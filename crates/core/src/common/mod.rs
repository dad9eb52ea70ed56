use serde::{Deserialize, Serialize};
use std::fmt;

pub mod time;

/// 为整数主键生成强类型包装，避免不同实体的 ID 混用。
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

row_id!(
    /// # Summary
    /// 用户的系统内唯一标识。
    UserId
);

row_id!(
    /// # Summary
    /// 股票标的的系统内唯一标识。
    StockId
);

row_id!(
    /// # Summary
    /// 订单的系统内唯一标识。
    ///
    /// # Invariants
    /// - 由存储层自增分配，一经创建不可变。
    OrderId
);

row_id!(
    /// # Summary
    /// 持仓记录的行标识。
    PortfolioId
);

row_id!(
    /// # Summary
    /// 审计流水的行标识。单调递增，可用作分页游标。
    HistoryId
);
