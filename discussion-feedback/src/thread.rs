use crate::classifier::{is_instructor_post, ClassifierThresholds, PostClassifier};
use crate::types::Post;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// A post and the indices of its direct replies, in discovery order.
#[derive(Debug, Clone)]
pub struct ThreadNode {
    pub post: Post,
    children: Vec<usize>,
}

impl ThreadNode {
    pub fn id(&self) -> u64 {
        self.post.id
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// Reply tree of one discussion, stored as an arena indexed by post id.
#[derive(Debug, Clone, Default)]
pub struct DiscussionThreads {
    nodes: Vec<ThreadNode>,
    by_id: HashMap<u64, usize>,
    roots: Vec<usize>,
    instructor_context: Option<usize>,
    orphans: usize,
}

impl DiscussionThreads {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &ThreadNode> + '_ {
        self.roots.iter().map(|&index| &self.nodes[index])
    }

    pub fn get(&self, id: u64) -> Option<&ThreadNode> {
        self.by_id.get(&id).map(|&index| &self.nodes[index])
    }

    pub fn contains(&self, id: u64) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Direct replies of `id`; empty for unknown ids.
    pub fn children(&self, id: u64) -> impl Iterator<Item = &ThreadNode> + '_ {
        self.by_id
            .get(&id)
            .map(|&index| self.nodes[index].children.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|&child| &self.nodes[child])
    }

    /// All posts in scan order.
    pub fn posts(&self) -> impl Iterator<Item = &Post> + '_ {
        self.nodes.iter().map(|node| &node.post)
    }

    pub fn into_posts(self) -> Vec<Post> {
        self.nodes.into_iter().map(|node| node.post).collect()
    }

    /// Posts whose parent was missing from the export, promoted to roots.
    pub fn orphan_count(&self) -> usize {
        self.orphans
    }

    /// Pre-order walk from every root, with depth (roots are depth 0).
    pub fn depth_first(&self) -> Vec<(usize, &ThreadNode)> {
        let mut visited = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|&index| (0, index)).collect();
        while let Some((depth, index)) = stack.pop() {
            let node = &self.nodes[index];
            visited.push((depth, node));
            stack.extend(node.children.iter().rev().map(|&child| (depth + 1, child)));
        }
        visited
    }

    /// First root that looks instructor-authored.
    pub fn instructor_context(&self) -> Option<&ThreadNode> {
        self.instructor_context.map(|index| &self.nodes[index])
    }

    /// True only for posts carrying the root sentinel; promoted orphans are
    /// roots of the tree but not of the discussion.
    pub fn is_discussion_root(&self, id: u64) -> bool {
        self.get(id).is_some_and(|node| node.post.is_root())
    }

    /// Write classification fields for every post that has none yet.
    pub fn classify_all(&mut self, classifier: &PostClassifier) {
        let mut classified = 0usize;
        for node in &mut self.nodes {
            if node.post.classification.is_some() {
                continue;
            }
            let is_root = node.post.is_root();
            node.post.classification = Some(classifier.classification_for(&node.post, is_root));
            classified += 1;
        }
        debug!("Classified {} posts", classified);
    }
}

/// Rebuilds reply structure from flat parent references.
#[derive(Debug, Clone, Default)]
pub struct ThreadBuilder {
    thresholds: ClassifierThresholds,
}

impl ThreadBuilder {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn build(&self, posts: Vec<Post>) -> DiscussionThreads {
        let mut threads = DiscussionThreads::default();

        // First pass: one node per post
        for post in posts {
            if threads.by_id.contains_key(&post.id) {
                warn!("Ignoring second post with id {}", post.id);
                continue;
            }
            threads.by_id.insert(post.id, threads.nodes.len());
            threads.nodes.push(ThreadNode {
                post,
                children: Vec::new(),
            });
        }

        // Second pass: link under parents, in scan order
        let mut parent_of: Vec<Option<usize>> = vec![None; threads.nodes.len()];
        for index in 0..threads.nodes.len() {
            let post = &threads.nodes[index].post;
            if post.is_root() || post.parent == post.id {
                threads.roots.push(index);
                continue;
            }
            match threads.by_id.get(&post.parent).copied() {
                Some(parent) => {
                    threads.nodes[parent].children.push(index);
                    parent_of[index] = Some(parent);
                }
                None => {
                    debug!("Post {} references missing parent {}", post.id, post.parent);
                    threads.orphans += 1;
                    threads.roots.push(index);
                }
            }
        }

        Self::break_cycles(&mut threads, &mut parent_of);

        threads.instructor_context = threads.roots.iter().copied().find(|&index| {
            let post = &threads.nodes[index].post;
            is_instructor_post(&post.body.to_lowercase(), post.char_len(), post.is_root(), &self.thresholds)
        });

        info!(
            "Built {} threads from {} posts ({} orphaned)",
            threads.roots.len(),
            threads.nodes.len(),
            threads.orphans
        );
        threads
    }

    /// Parent cycles leave nodes unreachable from any root. Promote the
    /// earliest unreachable node of each cycle until everything is reachable.
    fn break_cycles(threads: &mut DiscussionThreads, parent_of: &mut [Option<usize>]) {
        loop {
            let mut reachable = vec![false; threads.nodes.len()];
            let mut stack = threads.roots.clone();
            while let Some(index) = stack.pop() {
                if reachable[index] {
                    continue;
                }
                reachable[index] = true;
                stack.extend(threads.nodes[index].children.iter().copied());
            }

            let Some(index) = reachable.iter().position(|&seen| !seen) else {
                break;
            };
            warn!("Parent cycle at post {}; treating it as a root", threads.nodes[index].post.id);
            if let Some(parent) = parent_of[index].take() {
                threads.nodes[parent].children.retain(|&child| child != index);
            }
            threads.roots.push(index);
            threads.orphans += 1;
        }
        threads.roots.sort_unstable();
    }
}
