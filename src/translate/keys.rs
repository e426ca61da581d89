use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};

#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Default)]
struct RotatorState {
    keys: Vec<ApiKey>,
    usage: Vec<u64>,
    exhausted: HashSet<usize>,
    next: usize,
}

impl RotatorState {
    fn position(&self, key: &ApiKey) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }
}

/// Round-robin API key pool with per-key usage counts and an exhausted set.
///
/// When every remaining key has been used equally often, rotation restarts at
/// the first key, so a fresh pool always hands out keys in configuration order.
pub struct KeyRotator {
    state: Mutex<RotatorState>,
}

impl KeyRotator {
    /// Blank and repeated keys are dropped, keeping first occurrence order.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = RotatorState::default();
        for key in keys {
            let key = ApiKey(key.into().trim().to_string());
            if key.0.is_empty() || state.keys.contains(&key) {
                continue;
            }
            state.keys.push(key);
            state.usage.push(0);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RotatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next non-exhausted key, or `None` once every key is exhausted.
    pub fn next_key(&self) -> Option<ApiKey> {
        let mut state = self.lock();
        let total = state.keys.len();

        let mut available = (0..total).filter(|i| !state.exhausted.contains(i));
        let first = available.next()?;
        let first_usage = state.usage[first];
        if available.all(|i| state.usage[i] == first_usage) {
            state.next = 0;
        }

        for _ in 0..total {
            let i = state.next;
            state.next = (i + 1) % total;
            if state.exhausted.contains(&i) {
                continue;
            }
            state.usage[i] += 1;
            return Some(state.keys[i].clone());
        }
        None
    }

    /// Returns `false` for keys not in the pool.
    pub fn mark_exhausted(&self, key: &ApiKey) -> bool {
        let mut state = self.lock();
        match state.position(key) {
            Some(i) => {
                state.exhausted.insert(i);
                true
            }
            None => false,
        }
    }

    /// Returns `false` for keys not in the pool.
    pub fn mark_active(&self, key: &ApiKey) -> bool {
        let mut state = self.lock();
        match state.position(key) {
            Some(i) => {
                state.exhausted.remove(&i);
                true
            }
            None => false,
        }
    }

    pub fn is_exhausted(&self, key: &ApiKey) -> Option<bool> {
        let state = self.lock();
        state.position(key).map(|i| state.exhausted.contains(&i))
    }

    pub fn available_keys(&self) -> Vec<ApiKey> {
        let state = self.lock();
        state
            .keys
            .iter()
            .enumerate()
            .filter(|(i, _)| !state.exhausted.contains(i))
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Times each key has been handed out, in configuration order.
    pub fn usage(&self) -> Vec<(ApiKey, u64)> {
        let state = self.lock();
        state.keys.iter().cloned().zip(state.usage.iter().copied()).collect()
    }
}

impl fmt::Debug for KeyRotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("KeyRotator")
            .field("keys", &state.keys.len())
            .field("exhausted", &state.exhausted.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ApiKey {
        ApiKey::new(s)
    }

    fn take(rotator: &KeyRotator, n: usize) -> Vec<String> {
        (0..n)
            .map(|_| rotator.next_key().unwrap().expose().to_string())
            .collect()
    }

    #[test]
    fn rotates_round_robin() {
        let rotator = KeyRotator::new(["a", "b", "c"]);
        assert_eq!(take(&rotator, 5), ["a", "b", "c", "a", "b"]);
    }

    #[test]
    fn skips_exhausted_keys() {
        let rotator = KeyRotator::new(["a", "b", "c"]);
        assert!(rotator.mark_exhausted(&key("b")));
        assert_eq!(take(&rotator, 4), ["a", "c", "a", "c"]);
        assert_eq!(rotator.is_exhausted(&key("b")), Some(true));
    }

    #[test]
    fn equal_usage_restarts_at_first_available() {
        let rotator = KeyRotator::new(["a", "b", "c"]);
        assert_eq!(take(&rotator, 1), ["a"]);
        rotator.mark_exhausted(&key("b"));
        // a=1, c=0: uneven, continue from the cursor.
        assert_eq!(take(&rotator, 1), ["c"]);
        // a=1, c=1: even again, restart from the front.
        assert_eq!(take(&rotator, 1), ["a"]);
    }

    #[test]
    fn all_exhausted_yields_none() {
        let rotator = KeyRotator::new(["a", "b"]);
        rotator.mark_exhausted(&key("a"));
        rotator.mark_exhausted(&key("b"));
        assert!(rotator.next_key().is_none());
        assert!(rotator.available_keys().is_empty());
    }

    #[test]
    fn mark_active_restores_key() {
        let rotator = KeyRotator::new(["a"]);
        rotator.mark_exhausted(&key("a"));
        assert!(rotator.next_key().is_none());
        assert!(rotator.mark_active(&key("a")));
        assert_eq!(take(&rotator, 1), ["a"]);
    }

    #[test]
    fn unknown_key_is_reported() {
        let rotator = KeyRotator::new(["a"]);
        assert!(!rotator.mark_exhausted(&key("zzz")));
        assert!(!rotator.mark_active(&key("zzz")));
        assert_eq!(rotator.is_exhausted(&key("zzz")), None);
    }

    #[test]
    fn blank_and_duplicate_keys_are_dropped() {
        let rotator = KeyRotator::new(["a", " ", "a", " b "]);
        assert_eq!(rotator.len(), 2);
        let keys: Vec<_> = rotator
            .available_keys()
            .iter()
            .map(|k| k.expose().to_string())
            .collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[test]
    fn empty_pool_has_no_key() {
        let rotator = KeyRotator::new(Vec::<String>::new());
        assert!(rotator.is_empty());
        assert!(rotator.next_key().is_none());
    }

    #[test]
    fn usage_counts_handouts() {
        let rotator = KeyRotator::new(["a", "b"]);
        take(&rotator, 3);
        let usage: Vec<_> = rotator
            .usage()
            .into_iter()
            .map(|(k, n)| (k.expose().to_string(), n))
            .collect();
        assert_eq!(usage, [("a".to_string(), 2), ("b".to_string(), 1)]);
    }

    #[test]
    fn debug_does_not_leak_keys() {
        let rotator = KeyRotator::new(["secret-key"]);
        let shown = format!("{rotator:?} {:?}", key("secret-key"));
        assert!(!shown.contains("secret"));
    }
}
