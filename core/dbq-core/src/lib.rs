//! # DBQ: Durable SQL-backed Queue Storage
//!
//! DBQ는 관계형 데이터베이스 위에 구현된 영속적 우선순위 큐 스토리지 엔진입니다.
//! 큐 엔트리는 페이로드(Meat)와 배치 정보(Ref)로 분리 저장되며, 여러 큐가
//! 하나의 페이로드를 참조 카운트로 공유할 수 있습니다.
//!
//! ## 주요 특징
//!
//! - **Meat/Ref 분리 저장**: 페이로드 공유 + 참조 카운트 기반 삭제
//! - **두 가지 순서**: 전달 순서 (prio DESC, id ASC) / 축출 순서 (prio ASC, id DESC)
//! - **장애 분류**: 실패 시점의 ping 결과로 `Unavailable` / `Unknown` 구분
//! - **배치 삽입 + 폴백**: 배치 실패 시 단건 모드로 재시도, 부분 성공은 보상 삭제
//! - **카운터 캐시**: 용량 검사는 DB 접근 없이 캐시로 수행
//!
//! ## 빠른 시작
//!
//! ```rust,no_run
//! use dbq_core::{
//!     AccessorConfig, PersistentQueue, PoolConfig, QueueConfig, QueueEntry, SqlitePool,
//!     StorageId, open_storage,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> dbq_core::DbqResult<()> {
//! // 커넥션 풀 + 액세서
//! let pool = SqlitePool::open("dbq.db", PoolConfig::default())?;
//! let storage = open_storage(Arc::new(pool), AccessorConfig::default())?;
//!
//! // 스토어 하나에 대한 큐
//! let queue = PersistentQueue::new(
//!     storage,
//!     QueueConfig::new(StorageId::new("node1", "callback", "joe")).with_max_entries(100),
//! )?;
//!
//! queue.put(&QueueEntry::new(9, "MSG_RAW", b"urgent".to_vec()), false)?;
//! queue.put(&QueueEntry::new(5, "MSG_RAW", b"normal".to_vec()), false)?;
//!
//! // 우선순위가 높은 엔트리가 먼저
//! let first = queue.take()?;
//! assert_eq!(first.map(|e| e.priority), Some(9));
//! # Ok(())
//! # }
//! ```
//!
//! ## 아키텍처
//!
//! ```text
//! PersistentQueue ─▶ QueueStorage (RetryingAccessor ─▶ DatabaseAccessor)
//!                                        │
//!                    StoreFactory / MeatFactory / RefFactory ─▶ ConnectionPool
//! ```
//!
//! ## 모듈 구조
//!
//! - [`queue`]: 큐 파사드 ([`PersistentQueue`])
//! - [`accessor`]: 트랜잭션 엔진, 재시도 데코레이터, 레지스트리
//! - [`schema`]: 테이블 DDL/DML, 방언([`Dialect`])
//! - [`codec`]: 엔트리 ↔ Meat/Ref 변환
//! - [`pool`]: 커넥션 풀 ([`SqlitePool`])
//! - [`config`]: 설정

pub mod accessor;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod id;
pub mod model;
pub mod pool;
pub mod queue;
pub mod schema;

// Logging utilities
pub mod logging;

// Re-export commonly used types
pub use accessor::{
    AccessorRegistry, DatabaseAccessor, EntryQuery, ModifyMode, QueueStorage, RetryingAccessor,
    StorageProblemListener, StorageStatus, open_storage,
};
pub use codec::{EntryCodec, EntryFactory};
pub use config::{AccessorConfig, Properties, QueueConfig};
pub use entry::{MAX_PRIORITY, MIN_PRIORITY, NORM_PRIORITY, QueueEntry};
pub use error::{DbqError, DbqResult};
pub use model::{EntryCount, StorageId, Store};
pub use pool::{ConnectionPool, PoolConfig, SqlitePool};
pub use queue::{PersistentQueue, PutInterceptor, StorageSizeListener};
pub use schema::{Dialect, LowestWalk};
