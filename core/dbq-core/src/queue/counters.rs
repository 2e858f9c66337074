//! 큐 카운터 캐시 (엔트리 수 / 바이트 수)

use crate::model::EntryCount;
use parking_lot::RwLock;

/// 캐시 상태
///
/// `Stale`은 마지막으로 확인된 값을 유지한다. 재계산 실패 시 관대한 조회가 이 값을 반환.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CachedCount {
    Known(EntryCount),
    Stale(EntryCount),
}

#[derive(Debug)]
pub(crate) struct Counters {
    state: RwLock<CachedCount>,
}

impl Counters {
    /// `Stale`로 시작, 첫 조회에서 DB 재계산
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(CachedCount::Stale(EntryCount::ZERO)),
        }
    }

    pub(crate) fn get(&self) -> Option<EntryCount> {
        match *self.state.read() {
            CachedCount::Known(count) => Some(count),
            CachedCount::Stale(_) => None,
        }
    }

    pub(crate) fn last_known(&self) -> EntryCount {
        match *self.state.read() {
            CachedCount::Known(count) | CachedCount::Stale(count) => count,
        }
    }

    pub(crate) fn set(&self, count: EntryCount) {
        *self.state.write() = CachedCount::Known(count);
    }

    pub(crate) fn invalidate(&self) {
        let mut state = self.state.write();
        if let CachedCount::Known(count) = *state {
            *state = CachedCount::Stale(count);
        }
    }

    /// `Stale` 상태에서는 무시 (다음 재계산이 덮어씀)
    pub(crate) fn add(&self, delta: &EntryCount) {
        if let CachedCount::Known(count) = &mut *self.state.write() {
            count.add(delta);
        }
    }

    pub(crate) fn subtract(&self, delta: &EntryCount) {
        if let CachedCount::Known(count) = &mut *self.state.write() {
            count.subtract(delta);
        }
    }

    /// 수정된 엔트리의 바이트 차이 반영
    pub(crate) fn adjust_bytes(&self, delta: i64, persistent: bool) {
        if let CachedCount::Known(count) = &mut *self.state.write() {
            count.num_of_bytes = (count.num_of_bytes + delta).max(0);
            if persistent {
                count.num_of_persistent_bytes = (count.num_of_persistent_bytes + delta).max(0);
            }
        }
    }
}
