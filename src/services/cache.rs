//! # 项目列表缓存
//!
//! 缓存最近一次从存储读取的项目摘要列表，减少重复的文件 I/O：
//! - 基于 TTL（生存时间）判断有效性，超过阈值后重新读取
//! - 每次经由 `Studio` 的写操作都会使缓存失效
//!
//! ## 搜索
//! 项目名称和描述的小写文本在写入缓存时预计算，
//! 搜索时使用 `memchr::memmem` 在缓存文本上做子串匹配。
//!
//! ## 线程安全
//! 使用 `std::sync::RwLock`，允许多个读操作并发进行。

use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::models::project::ProjectSummary;

/// 项目列表缓存的默认有效期
pub const PROJECT_CACHE_TTL: Duration = Duration::from_secs(30);

pub struct ProjectCache {
    ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
}

struct CacheEntry {
    summaries: Vec<ProjectSummary>,
    /// 与 `summaries` 一一对应的小写化搜索文本
    search_texts: Vec<String>,
    cached_at: Instant,
}

impl ProjectCache {
    pub fn new() -> Self {
        Self::with_ttl(PROJECT_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    /// 获取缓存的项目摘要（缓存仍然有效时）
    pub fn get(&self) -> Option<Vec<ProjectSummary>> {
        let cache = self.entry.read().ok()?;
        let entry = cache.as_ref()?;

        if entry.cached_at.elapsed() <= self.ttl {
            Some(entry.summaries.clone())
        } else {
            None
        }
    }

    /// 更新缓存
    pub fn set(&self, summaries: Vec<ProjectSummary>) {
        let search_texts = summaries
            .iter()
            .map(|s| format!("{}\n{}", s.name, s.description).to_lowercase())
            .collect();

        if let Ok(mut cache) = self.entry.write() {
            *cache = Some(CacheEntry {
                summaries,
                search_texts,
                cached_at: Instant::now(),
            });
        }
    }

    /// 使缓存失效，下次查询重新读取存储
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.entry.write() {
            *cache = None;
        }
    }

    /// 在缓存的项目名称和描述中做不区分大小写的子串搜索
    ///
    /// # 返回值
    /// - `Some(summaries)` - 匹配的项目，空查询返回全部
    /// - `None` - 缓存无效，调用方需要先刷新
    pub fn search(&self, query: &str) -> Option<Vec<ProjectSummary>> {
        let cache = self.entry.read().ok()?;
        let entry = cache.as_ref().filter(|e| e.cached_at.elapsed() <= self.ttl)?;

        let needle = query.trim().to_lowercase();
        let finder = memchr::memmem::Finder::new(needle.as_bytes());

        Some(
            entry
                .search_texts
                .iter()
                .zip(&entry.summaries)
                .filter(|(text, _)| finder.find(text.as_bytes()).is_some())
                .map(|(_, summary)| summary.clone())
                .collect(),
        )
    }
}

impl Default for ProjectCache {
    fn default() -> Self {
        Self::new()
    }
}
