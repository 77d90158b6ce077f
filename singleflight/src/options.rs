use std::fmt;

use crate::context::Context;

/// Hook called once for every caller that joins a call already in flight.
pub type OnWait<K> = Box<dyn Fn(&Context, &K) + Send + Sync>;

/// Options represents the options for a [`Group`](crate::Group)
pub struct Options<K> {
    /// PoolCapacity is the number of retired call records kept for reuse. default is 64
    /// set to 0 to allocate a fresh record for every call.
    pub pool_capacity: usize,
    /// OnWait is called with the waiter's context and the key, right before a caller
    /// that joined an in-flight call starts waiting. default is none
    /// the executing caller never triggers it. It should return quickly: a slow hook
    /// delays that waiter, nothing else.
    pub on_wait: Option<OnWait<K>>,
}

impl<K> Options<K> {
    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    pub fn on_wait<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, &K) + Send + Sync + 'static,
    {
        self.on_wait = Some(Box::new(hook));
        self
    }
}

impl<K> Default for Options<K> {
    fn default() -> Self {
        Self {
            pool_capacity: 64,
            on_wait: None,
        }
    }
}

impl<K> fmt::Debug for Options<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("pool_capacity", &self.pool_capacity)
            .field("on_wait", &self.on_wait.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Options;
    use crate::context::Context;

    #[test]
    fn test_default() {
        let options = Options::<String>::default();
        assert_eq!(options.pool_capacity, 64);
        assert!(options.on_wait.is_none());
        assert_eq!(
            format!("{options:?}"),
            "Options { pool_capacity: 64, on_wait: false }"
        );
    }

    #[test]
    fn test_builder() {
        let options = Options::<&str>::default()
            .with_pool_capacity(0)
            .on_wait(|_ctx, key| assert_eq!(*key, "k"));
        assert_eq!(options.pool_capacity, 0);
        let hook = options.on_wait.as_ref().unwrap();
        hook(&Context::new(), &"k");
    }
}
