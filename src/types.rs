pub type Span = std::ops::Range<usize>;
