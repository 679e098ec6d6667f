use serde::Serialize;

/// Position of a label in the fixed class list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClassIndex(usize);

impl ClassIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

/// Ordered class labels, fixed at process start.
#[derive(Debug, Clone)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<ClassIndex> {
        self.labels.iter().position(|l| l == label).map(ClassIndex)
    }

    pub fn index(&self, idx: usize) -> Option<ClassIndex> {
        (idx < self.labels.len()).then_some(ClassIndex(idx))
    }

    pub fn label(&self, idx: ClassIndex) -> &str {
        &self.labels[idx.0]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }
}
