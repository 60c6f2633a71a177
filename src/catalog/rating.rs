use std::cmp::Ordering;

/// Mean review score rounded half-to-even, computed from the exact SUM and
/// COUNT the store reports. None when the title has no reviews; the rating
/// is derived on every read and never stored.
pub fn mean_rating(sum: i64, count: i64) -> Option<i32> {
    if count <= 0 {
        return None;
    }
    let q = sum.div_euclid(count);
    let r = sum.rem_euclid(count);
    let rounded = match (2 * r).cmp(&count) {
        Ordering::Less => q,
        Ordering::Greater => q + 1,
        // Exact half: round to the even neighbour.
        Ordering::Equal => {
            if q % 2 == 0 {
                q
            } else {
                q + 1
            }
        }
    };
    Some(rounded as i32)
}
