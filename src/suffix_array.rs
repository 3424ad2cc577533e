// Suffix array construction over integer alphabets, plus the lower-bound
// search used to seed match candidates.
//
// Construction is SA-IS (induced sorting): classify suffixes as L/S, seed
// the left-most S-type positions into their buckets, induce, name the LMS
// substrings, and recurse while names collide. Linear in input length plus
// alphabet size.

use std::cmp::Ordering;

const EMPTY: u32 = u32::MAX;

/// Builds the suffix array of `text`, whose symbols all lie in
/// `0..cardinality`.
pub fn make_suffix_array(text: &[u32], cardinality: usize) -> Vec<u32> {
    if text.is_empty() {
        return Vec::new();
    }
    debug_assert!(text.iter().all(|&c| (c as usize) < cardinality));
    // Induced sorting needs a unique smallest sentinel at the end; shift
    // every symbol up by one to make room for it.
    let mut shifted: Vec<u32> = Vec::with_capacity(text.len() + 1);
    shifted.extend(text.iter().map(|&c| c + 1));
    shifted.push(0);
    let sa = sais(&shifted, cardinality + 1);
    // The sentinel suffix always sorts first; drop it.
    sa.into_iter().skip(1).collect()
}

/// First suffix-array position whose suffix compares `>= query`. A suffix
/// that is a strict prefix of `query` compares less.
pub fn suffix_lower_bound(sa: &[u32], text: &[u32], query: &[u32]) -> usize {
    sa.partition_point(|&i| text[i as usize..].cmp(query) == Ordering::Less)
}

/// Reference implementation by direct suffix comparison, used as a test
/// oracle. Quadratic; test-sized inputs only.
pub fn naive_suffix_sort(text: &[u32]) -> Vec<u32> {
    let mut sa: Vec<u32> = (0..text.len() as u32).collect();
    sa.sort_by(|&a, &b| text[a as usize..].cmp(&text[b as usize..]));
    sa
}

// `s` must end with a unique smallest symbol and use the alphabet `0..k`.
fn sais(s: &[u32], k: usize) -> Vec<u32> {
    let n = s.len();
    if n == 1 {
        return vec![0];
    }
    if n == 2 {
        return vec![1, 0];
    }

    // Suffix types: true for S (suffix smaller than its successor).
    let mut is_s = vec![false; n];
    is_s[n - 1] = true;
    for i in (0..n - 1).rev() {
        is_s[i] = s[i] < s[i + 1] || (s[i] == s[i + 1] && is_s[i + 1]);
    }
    let is_lms = |i: usize| i > 0 && is_s[i] && !is_s[i - 1];

    let mut bucket = vec![0u32; k];
    for &c in s {
        bucket[c as usize] += 1;
    }

    let mut sa = vec![EMPTY; n];

    // Round 1: seed LMS positions in text order, induce, and use the
    // result to rank the LMS substrings.
    let mut tail = bucket_tails(&bucket);
    for i in (1..n).rev() {
        if is_lms(i) {
            let c = s[i] as usize;
            tail[c] -= 1;
            sa[tail[c] as usize] = i as u32;
        }
    }
    induce(&mut sa, s, &is_s, &bucket);

    let lms_positions: Vec<usize> = (1..n).filter(|&i| is_lms(i)).collect();
    let mut sorted_lms = Vec::with_capacity(lms_positions.len());
    for &entry in sa.iter() {
        if entry != EMPTY && is_lms(entry as usize) {
            sorted_lms.push(entry as usize);
        }
    }

    let mut name_of = vec![EMPTY; n];
    let mut name: u32 = 0;
    let mut prev: Option<usize> = None;
    for &i in &sorted_lms {
        if let Some(p) = prev {
            if !lms_substrings_equal(s, p, i, &is_lms) {
                name += 1;
            }
        }
        name_of[i] = name;
        prev = Some(i);
    }

    let lms_order: Vec<usize> = if (name as usize + 1) == lms_positions.len() {
        sorted_lms
    } else {
        // Names collide: recurse on the reduced string to order them.
        let reduced: Vec<u32> = lms_positions.iter().map(|&i| name_of[i]).collect();
        let reduced_sa = sais(&reduced, name as usize + 1);
        reduced_sa
            .into_iter()
            .map(|ri| lms_positions[ri as usize])
            .collect()
    };

    // Round 2: seed the now fully ordered LMS suffixes and induce again.
    sa.fill(EMPTY);
    let mut tail = bucket_tails(&bucket);
    for &i in lms_order.iter().rev() {
        let c = s[i] as usize;
        tail[c] -= 1;
        sa[tail[c] as usize] = i as u32;
    }
    induce(&mut sa, s, &is_s, &bucket);
    sa
}

fn bucket_heads(bucket: &[u32]) -> Vec<u32> {
    let mut heads = Vec::with_capacity(bucket.len());
    let mut sum = 0u32;
    for &count in bucket {
        heads.push(sum);
        sum += count;
    }
    heads
}

fn bucket_tails(bucket: &[u32]) -> Vec<u32> {
    let mut tails = Vec::with_capacity(bucket.len());
    let mut sum = 0u32;
    for &count in bucket {
        sum += count;
        tails.push(sum);
    }
    tails
}

fn induce(sa: &mut [u32], s: &[u32], is_s: &[bool], bucket: &[u32]) {
    let n = s.len();
    // L-type pass, left to right, filling bucket heads.
    let mut head = bucket_heads(bucket);
    for i in 0..n {
        let entry = sa[i];
        if entry == EMPTY || entry == 0 {
            continue;
        }
        let j = entry as usize - 1;
        if !is_s[j] {
            let c = s[j] as usize;
            sa[head[c] as usize] = j as u32;
            head[c] += 1;
        }
    }
    // S-type pass, right to left, filling bucket tails. This overwrites the
    // provisional LMS seeds in their final relative order.
    let mut tail = bucket_tails(bucket);
    for i in (0..n).rev() {
        let entry = sa[i];
        if entry == EMPTY || entry == 0 {
            continue;
        }
        let j = entry as usize - 1;
        if is_s[j] {
            let c = s[j] as usize;
            tail[c] -= 1;
            sa[tail[c] as usize] = j as u32;
        }
    }
}

// Compares the LMS substrings starting at `a` and `b`: equal symbols all the
// way to (and including) the next LMS boundary.
fn lms_substrings_equal(s: &[u32], a: usize, b: usize, is_lms: &dyn Fn(usize) -> bool) -> bool {
    if a == b {
        return true;
    }
    let n = s.len();
    let mut j = 0;
    loop {
        if a + j >= n || b + j >= n {
            return false;
        }
        if s[a + j] != s[b + j] {
            return false;
        }
        if j > 0 {
            let a_ends = is_lms(a + j);
            let b_ends = is_lms(b + j);
            if a_ends || b_ends {
                return a_ends && b_ends;
            }
        }
        j += 1;
    }
}
