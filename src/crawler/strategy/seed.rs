use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

use super::{CrawlContext, StrategyError};
use crate::crawler::navigator::NavigationError;
use crate::crawler::record::{Capture, Content};

/// A URL waiting in the frontier together with its distance from a seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub url: String,
    pub depth: u32,
}

/// Breadth-first work queue for link discovery.
///
/// A URL enters the queue at most once. Nodes deeper than `max_depth` are
/// never enqueued, so everything pending is navigable.
#[derive(Debug)]
pub struct Frontier {
    queue: VecDeque<Node>,
    seen: HashSet<String>,
    visited: HashSet<String>,
    max_depth: Option<u32>,
}

impl Frontier {
    pub fn new(seeds: &[String], max_depth: Option<u32>) -> Self {
        let mut frontier = Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
            visited: HashSet::new(),
            max_depth,
        };
        for seed in seeds {
            if frontier.seen.insert(seed.clone()) {
                frontier.queue.push_back(Node {
                    url: seed.clone(),
                    depth: 0,
                });
            }
        }
        frontier
    }

    fn within_depth(&self, depth: u32) -> bool {
        self.max_depth.map_or(true, |max| depth <= max)
    }

    /// Dequeue the next unvisited node and mark it visited
    pub fn next(&mut self) -> Option<Node> {
        while let Some(node) = self.queue.pop_front() {
            if self.visited.contains(&node.url) || !self.within_depth(node.depth) {
                continue;
            }
            self.visited.insert(node.url.clone());
            return Some(node);
        }
        None
    }

    /// Enqueue the unseen http(s) links found on `parent`.
    /// Returns how many were added.
    pub fn discover(&mut self, parent: &Node, links: &[String]) -> usize {
        let depth = parent.depth + 1;
        if !self.within_depth(depth) {
            return 0;
        }

        let mut added = 0;
        for link in links {
            if !(link.starts_with("http://") || link.starts_with("https://")) {
                continue;
            }
            if self.seen.insert(link.clone()) {
                self.queue.push_back(Node {
                    url: link.clone(),
                    depth,
                });
                added += 1;
            }
        }
        added
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn visited(&self) -> usize {
        self.visited.len()
    }
}

/// Keep links containing at least one rule. No rules keeps everything.
pub fn filter_links(links: Vec<String>, rules: &[String]) -> Vec<String> {
    let rules: Vec<&str> = rules.iter().map(|r| r.trim()).filter(|r| !r.is_empty()).collect();
    if rules.is_empty() {
        return links;
    }
    links
        .into_iter()
        .filter(|link| rules.iter().any(|rule| link.contains(rule)))
        .collect()
}

pub(super) async fn crawl(ctx: &mut CrawlContext<'_>) -> Result<(), StrategyError> {
    let job = ctx.job;
    let options = &job.options;
    let anchors = match options.link_scope() {
        Some(scope) => format!("{} a[href]", scope),
        None => "a[href]".to_string(),
    };
    let delay = ctx.crawl_delay();

    let mut frontier = Frontier::new(&job.urls, options.max_depth);
    let mut emitted = 0u32;

    while let Some(node) = frontier.next() {
        ctx.ensure_active()?;
        emitted += 1;
        let at_limit = options.limit.map_or(false, |limit| emitted >= limit);

        let landed = match ctx.navigator.navigate(ctx.page, &node.url, delay, ctx.cancel).await {
            Ok(landed) => landed,
            Err(NavigationError::Cancelled) => return Err(StrategyError::Cancelled),
            Err(e) => {
                warn!("{}", e);
                let is_last = at_limit || !frontier.has_pending();
                ctx.channel.failure(&node.url, e.to_string(), is_last).await;
                if is_last {
                    break;
                }
                continue;
            }
        };

        let links = match ctx.page.link_targets(&anchors).await {
            Ok(links) => filter_links(links, &options.link_filter_rules),
            Err(e) => {
                debug!("Could not collect links on {}: {}", node.url, e);
                Vec::new()
            }
        };

        let added = if at_limit { 0 } else { frontier.discover(&node, &links) };
        let is_last = at_limit || !frontier.has_pending();
        info!(
            "Crawled {} at depth {}: {} links, {} new",
            node.url,
            node.depth,
            links.len(),
            added
        );

        ctx.channel
            .success(&node.url, Some(landed), Capture::Content(Content::Links(links)), is_last)
            .await;

        if is_last {
            break;
        }
    }

    debug!("Visited {} nodes", frontier.visited());
    Ok(())
}
