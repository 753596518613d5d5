/// Lifecycle of an engine, shared by the workers and the serializer.
///
/// Transitions: `New -> Running` on the first accepted submission,
/// `New -> Closed` on a `wait` with no submissions, `Running -> Closed` on
/// `wait`, and `Closed -> Finished` once the terminal callback has produced
/// the cached value. `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    New,
    Running,
    Closed,
    Finished,
}
