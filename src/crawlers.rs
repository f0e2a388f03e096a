//! Compile-time crawler table.
//!
//! Site crawlers are statically linked: implement
//! [`Crawler`](crate::common::interface::Crawler) in a module and add its
//! constructor here. The node registers every entry at startup; a factory
//! that fails is logged and skipped.

use crate::common::interface::CrawlerFactory;

pub static CRAWLERS: &[CrawlerFactory] = &[];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CrawlerManager;

    #[test]
    fn test_table_loads() {
        let manager = CrawlerManager::new("host-a");
        assert_eq!(manager.load_factories(CRAWLERS), CRAWLERS.len());
        assert_eq!(manager.count(), CRAWLERS.len());
    }
}
