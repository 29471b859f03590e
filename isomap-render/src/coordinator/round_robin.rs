use std::collections::VecDeque;

/// Fair merge of several finite iterators.
///
/// Takes one item from each source in turn. Exhausted sources are dropped.
pub(crate) struct RoundRobin<I> {
    sources: VecDeque<I>,
}

impl<I: Iterator> RoundRobin<I> {
    pub(crate) fn new(sources: impl IntoIterator<Item = I>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
        }
    }
}

impl<I: Iterator> Iterator for RoundRobin<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(mut source) = self.sources.pop_front() {
            if let Some(item) = source.next() {
                self.sources.push_back(source);
                return Some(item);
            }
        }
        None
    }
}
