#![forbid(unsafe_code)]
//! String-distance oracles used by the matcher.
//!
//! All functions are pure and operate on raw word bytes.

use smallvec::SmallVec;

const INF: u32 = u32::MAX / 2;

/// Number of positions at which two words differ.
///
/// Words of different length differ additionally by their length gap.
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    let mismatches = a.iter().zip(b).filter(|(x, y)| x != y).count();
    (mismatches + a.len().abs_diff(b.len())) as u32
}

/// Levenshtein distance between `a` and `b` if it is smaller than `bound`.
///
/// Only the diagonal band `|i - j| < bound` is evaluated and the scan
/// stops as soon as a whole row reaches `bound`.
pub fn edit(a: &[u8], b: &[u8], bound: u32) -> Option<u32> {
    let band = bound as usize;
    if band == 0 || a.len().abs_diff(b.len()) >= band {
        return None;
    }
    let m = b.len();
    let mut prev: SmallVec<[u32; 32]> = (0..=m)
        .map(|j| if j < band { j as u32 } else { INF })
        .collect();
    let mut cur: SmallVec<[u32; 32]> = SmallVec::from_elem(INF, m + 1);
    for i in 1..=a.len() {
        cur.fill(INF);
        cur[0] = if i < band { i as u32 } else { INF };
        let mut row_min = cur[0];
        let lo = i.saturating_sub(band - 1).max(1);
        let hi = (i + band - 1).min(m);
        for j in lo..=hi {
            let substitute = prev[j - 1] + u32::from(a[i - 1] != b[j - 1]);
            let delete = prev[j] + 1;
            let insert = cur[j - 1] + 1;
            let cell = substitute.min(delete).min(insert);
            cur[j] = cell;
            row_min = row_min.min(cell);
        }
        if row_min >= bound {
            return None;
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    let dist = prev[m];
    (dist < bound).then_some(dist)
}
