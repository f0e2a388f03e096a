use dashmap::DashMap;
use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;

use crate::common::interface::{Crawler, CrawlerFactory};
use crate::common::model::CrawlerInfo;
use crate::errors::{CrawlerError, Result};
use crate::utils::encrypt::md5;
use crate::utils::glob::DomainGlob;

/// A registered crawler together with its compiled host globs and the
/// node-scoped global id the gateway uses to tell instances apart.
pub struct CrawlerEntry {
    pub id: String,
    pub version: i32,
    pub gid: String,
    pub globs: Vec<DomainGlob>,
    pub crawler: Arc<dyn Crawler>,
}

impl CrawlerEntry {
    pub fn matches(&self, host: &str) -> bool {
        self.globs.iter().any(|g| g.matches(host))
    }

    pub fn info(&self) -> CrawlerInfo {
        CrawlerInfo {
            id: self.id.clone(),
            version: self.version,
            gid: self.gid.clone(),
            allowed_domains: self.globs.iter().map(|g| g.pattern().to_string()).collect(),
        }
    }
}

impl fmt::Debug for CrawlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlerEntry")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("gid", &self.gid)
            .field("globs", &self.globs)
            .finish()
    }
}

pub fn global_id(hostname: &str, id: &str, version: i32) -> String {
    md5(format!("{hostname}|{id}|{version}").as_bytes())
}

/// Versioned directory of loaded crawlers.
///
/// Filled once at startup and read concurrently by every job afterwards.
pub struct CrawlerManager {
    hostname: String,
    // id -> entries, newest version first
    crawlers: DashMap<String, Vec<Arc<CrawlerEntry>>>,
    by_gid: DashMap<String, Arc<CrawlerEntry>>,
}

impl CrawlerManager {
    pub fn new(hostname: impl AsRef<str>) -> Self {
        CrawlerManager {
            hostname: hostname.as_ref().to_string(),
            crawlers: DashMap::new(),
            by_gid: DashMap::new(),
        }
    }

    /// Registers `crawler`, replacing an existing one with the same id and version.
    pub fn save(&self, crawler: Arc<dyn Crawler>) -> Result<Arc<CrawlerEntry>> {
        let id = crawler.id().to_string();
        let version = crawler.version();
        let globs = crawler
            .allowed_domains()
            .iter()
            .map(DomainGlob::new)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CrawlerError::LoadFailed(id.clone(), e.into()))?;
        if globs.is_empty() {
            warn!("crawler {id}@{version} declares no allowed domains");
        }

        let entry = Arc::new(CrawlerEntry {
            gid: global_id(&self.hostname, &id, version),
            id: id.clone(),
            version,
            globs,
            crawler,
        });

        let mut versions = self.crawlers.entry(id).or_default();
        versions.retain(|e| e.version != version);
        versions.push(entry.clone());
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        drop(versions);

        self.by_gid.insert(entry.gid.clone(), entry.clone());
        info!("registered crawler {}@{} gid={}", entry.id, entry.version, entry.gid);
        Ok(entry)
    }

    /// Builds and registers every crawler in `factories`. A factory that
    /// fails is logged and skipped. Returns how many were registered.
    pub fn load_factories(&self, factories: &[CrawlerFactory]) -> usize {
        let mut loaded = 0;
        for factory in factories {
            match factory().and_then(|crawler| self.save(crawler)) {
                Ok(_) => loaded += 1,
                Err(e) => error!("failed to load crawler: {e}"),
            }
        }
        loaded
    }

    /// Crawlers whose allowed domains match `host`, ordered by id then
    /// newest version first.
    pub fn get_by_host(&self, host: &str) -> Vec<Arc<CrawlerEntry>> {
        let mut matched: Vec<Arc<CrawlerEntry>> = self
            .crawlers
            .iter()
            .flat_map(|versions| {
                versions
                    .iter()
                    .filter(|e| e.matches(host))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        sort_entries(&mut matched);
        matched
    }

    pub fn get_by_gid(&self, gid: &str) -> Option<Arc<CrawlerEntry>> {
        self.by_gid.get(gid).map(|e| e.value().clone())
    }

    /// Newest registered version of `id`.
    pub fn get_by_id(&self, id: &str) -> Option<Arc<CrawlerEntry>> {
        self.crawlers.get(id).and_then(|v| v.first().cloned())
    }

    pub fn get_by_id_version(&self, id: &str, version: i32) -> Option<Arc<CrawlerEntry>> {
        self.crawlers
            .get(id)
            .and_then(|v| v.iter().find(|e| e.version == version).cloned())
    }

    pub fn list(&self) -> Vec<Arc<CrawlerEntry>> {
        let mut all: Vec<Arc<CrawlerEntry>> = self
            .crawlers
            .iter()
            .flat_map(|v| v.value().clone())
            .collect();
        sort_entries(&mut all);
        all
    }

    pub fn count(&self) -> usize {
        self.by_gid.len()
    }

    pub fn infos(&self) -> Vec<CrawlerInfo> {
        self.list().iter().map(|e| e.info()).collect()
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

fn sort_entries(entries: &mut [Arc<CrawlerEntry>]) {
    entries.sort_by(|a, b| a.id.cmp(&b.id).then(b.version.cmp(&a.version)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::interface::YieldSink;
    use crate::common::model::{Response, ShareContext};
    use crate::errors::Error;
    use async_trait::async_trait;

    struct StaticCrawler {
        id: &'static str,
        version: i32,
        domains: &'static [&'static str],
    }

    #[async_trait]
    impl Crawler for StaticCrawler {
        fn id(&self) -> &str {
            self.id
        }

        fn version(&self) -> i32 {
            self.version
        }

        fn allowed_domains(&self) -> Vec<String> {
            self.domains.iter().map(|d| d.to_string()).collect()
        }

        async fn parse(&self, _: ShareContext, _: Response, _: &dyn YieldSink) -> Result<()> {
            Ok(())
        }
    }

    fn crawler(id: &'static str, version: i32, domains: &'static [&'static str]) -> Arc<dyn Crawler> {
        Arc::new(StaticCrawler { id, version, domains })
    }

    #[test]
    fn test_get_by_host_routes_by_glob() {
        let manager = CrawlerManager::new("node-a");
        manager.save(crawler("asos", 1, &["*.asos.com"])).unwrap();
        manager.save(crawler("sandro", 1, &["sandro-paris.com"])).unwrap();

        let found = manager.get_by_host("www.asos.com");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "asos");

        assert_eq!(manager.get_by_host("sandro-paris.com")[0].id, "sandro");
        assert!(manager.get_by_host("unknown.test").is_empty());
        assert!(manager.get_by_host("asos.com").is_empty());
    }

    #[test]
    fn test_versions_coexist_and_save_overwrites() {
        let manager = CrawlerManager::new("node-a");
        manager.save(crawler("asos", 1, &["*.asos.com"])).unwrap();
        manager.save(crawler("asos", 3, &["*.asos.com"])).unwrap();
        manager.save(crawler("asos", 2, &["*.asos.com"])).unwrap();
        manager.save(crawler("asos", 2, &["www.asos.com"])).unwrap();

        assert_eq!(manager.count(), 3);
        assert_eq!(manager.get_by_id("asos").unwrap().version, 3);
        let v2 = manager.get_by_id_version("asos", 2).unwrap();
        assert_eq!(v2.globs[0].pattern(), "www.asos.com");
        assert!(manager.get_by_id_version("asos", 4).is_none());

        let versions: Vec<i32> = manager
            .get_by_host("www.asos.com")
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![3, 2, 1]);
    }

    #[test]
    fn test_gid_is_node_scoped() {
        let a = CrawlerManager::new("node-a");
        let b = CrawlerManager::new("node-b");
        let ea = a.save(crawler("asos", 1, &["*.asos.com"])).unwrap();
        let eb = b.save(crawler("asos", 1, &["*.asos.com"])).unwrap();

        assert_ne!(ea.gid, eb.gid);
        assert_eq!(ea.gid, global_id("node-a", "asos", 1));
        assert_eq!(a.get_by_gid(&ea.gid).unwrap().id, "asos");
        assert!(a.get_by_gid(&eb.gid).is_none());
    }

    #[test]
    fn test_list_and_infos() {
        let manager = CrawlerManager::new("node-a");
        manager.save(crawler("zara", 1, &["www.zara.com"])).unwrap();
        manager.save(crawler("asos", 1, &["*.asos.com"])).unwrap();

        let ids: Vec<String> = manager.list().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["asos", "zara"]);
        let infos = manager.infos();
        assert_eq!(infos[0].allowed_domains, vec!["*.asos.com"]);
        assert_eq!(infos[1].gid, global_id("node-a", "zara", 1));
    }

    #[test]
    fn test_load_factories_skips_failures() {
        fn good() -> Result<Arc<dyn Crawler>> {
            Ok(crawler("asos", 1, &["*.asos.com"]))
        }
        fn bad() -> Result<Arc<dyn Crawler>> {
            Err(Error::from(CrawlerError::LoadFailed("broken".into(), "missing config".into())))
        }

        let manager = CrawlerManager::new("node-a");
        assert_eq!(manager.load_factories(&[good, bad]), 1);
        assert_eq!(manager.count(), 1);
    }
}
