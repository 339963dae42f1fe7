use fnv::FnvHashMap as HashMap;
use std::hash::Hash;

/// partition membership vector into groups of indexes
/// # Arguments
/// * `membership` - a vector of membership (E.g., group assignment)
/// # Returns
/// A hashmap: group name -> indexes of the elements (in increasing order)
pub fn partition_by_membership<T>(membership: &[T]) -> HashMap<T, Vec<usize>>
where
    T: Eq + Hash + Clone,
{
    let mut groups: HashMap<T, Vec<usize>> = HashMap::default();
    for (elem, k) in membership.iter().enumerate() {
        groups.entry(k.clone()).or_default().push(elem);
    }
    groups
}

/// Indexes in `0..n` that are not listed in `remove`
/// * `n` - number of total elements
/// * `remove` - indexes to drop (duplicates are fine)
pub fn complement_indices(n: usize, remove: &[usize]) -> Vec<usize> {
    let mut drop = vec![false; n];
    for &i in remove.iter().filter(|&&i| i < n) {
        drop[i] = true;
    }
    (0..n).filter(|&i| !drop[i]).collect()
}
