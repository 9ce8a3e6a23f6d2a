/// Conflict message for a second review of the same title by the same author.
pub const DUPLICATE_REVIEW: &str = "cannot submit more than one review for a title";

/// mean_rating
///
/// Arithmetic mean of `scores`, rounded half away from zero to match Postgres
/// `ROUND(AVG(score))`. `None` when there are no scores.
pub fn mean_rating<I>(scores: I) -> Option<i32>
where
    I: IntoIterator<Item = i16>,
{
    let (sum, count) = scores
        .into_iter()
        .fold((0i64, 0i64), |(sum, count), score| (sum + i64::from(score), count + 1));
    if count == 0 {
        return None;
    }
    // Scores are positive, so (2*sum + count) / (2*count) rounds half up.
    let rounded = (2 * sum + count) / (2 * count);
    i32::try_from(rounded).ok()
}
