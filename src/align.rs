/// Rounds a size up to the next multiple of the native word size.
///
/// Block sizes and the size header are always word-rounded, so every
/// pointer handed out by the allocator stays word-aligned.
///
/// # Examples
///
/// ```rust
/// use guardalloc::align;
///
/// let word = std::mem::size_of::<usize>();
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(word - 1), word);
/// assert_eq!(align!(word + 1), word * 2);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + ::std::mem::size_of::<usize>() - 1) & !(::std::mem::size_of::<usize>() - 1)
  };
}
