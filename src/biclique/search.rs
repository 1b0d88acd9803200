//! Branch-and-bound enumeration of maximal bicliques.
//!
//! The bipartite graph is attribute × entity: each candidate `BitmapPair` is an
//! attribute vertex whose bitmap is its entity neighbourhood. State per level:
//!
//! - `L`: entities common to every chosen attribute (`None` before the first pick)
//! - `R`: chosen attributes
//! - `P`: candidates still to branch on
//! - `Q`: candidates already branched on, used to reject non-maximal branches
//!
//! Every level owns its own `R`, `P`, `Q` and `L`; sibling branches never share
//! backing storage.

use std::ops::ControlFlow;

use tracing::trace;

use crate::cancel::CancelToken;
use crate::model::{Bitmap, BitmapPair, Tiles};

/// One maximal biclique as found by the search: its attribute ids and the
/// entities they all share.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBiclique {
    pub tiles: Tiles,
    pub members: Bitmap,
}

/// Enumerate every maximal biclique among `candidates`, in candidate order,
/// handing each to `emit`.
///
/// Stops early when `emit` breaks or `cancel` fires; returns `Break` in that case.
pub fn find_bicliques<F>(candidates: &[BitmapPair], cancel: &CancelToken, mut emit: F) -> ControlFlow<()>
where
    F: FnMut(RawBiclique) -> ControlFlow<()>,
{
    let p: Vec<&BitmapPair> = candidates.iter().collect();
    expand(None, Tiles::new(), p, Vec::new(), cancel, &mut emit, 0)
}

fn expand<'a, F>(
    l: Option<&Bitmap>,
    r: Tiles,
    mut p: Vec<&'a BitmapPair>,
    mut q: Vec<&'a BitmapPair>,
    cancel: &CancelToken,
    emit: &mut F,
    depth: usize,
) -> ControlFlow<()>
where
    F: FnMut(RawBiclique) -> ControlFlow<()>,
{
    // Candidates are taken from the front, in ranked order.
    p.reverse();
    while let Some(x) = p.pop() {
        if cancel.is_cancelled() {
            return ControlFlow::Break(());
        }

        // R' = R ∪ {x}; L' = L ∩ N(x)
        let mut new_r = r.clone();
        new_r.push(x.id);
        let new_l = match l {
            Some(l) => l.intersect(&x.bitmap),
            None => x.bitmap.clone(),
        };
        let cnt = new_l.count();

        // A previously branched vertex adjacent to all of L' means this
        // branch was already covered.
        let mut maximal = true;
        let mut new_q = Vec::with_capacity(q.len());
        for v in &q {
            let shared = v.bitmap.intersection_count(&new_l);
            if shared == cnt {
                maximal = false;
                break;
            } else if shared > 0 {
                new_q.push(*v);
            }
        }

        if maximal {
            // Remaining candidates adjacent to all of L' join R' directly;
            // partially adjacent ones stay candidates for the next level.
            let mut new_p = Vec::with_capacity(p.len());
            for v in p.iter().rev() {
                let shared = v.bitmap.intersection_count(&new_l);
                if shared == cnt {
                    new_r.push(v.id);
                } else if shared > 0 {
                    new_p.push(*v);
                }
            }

            trace!(depth, tiles = ?new_r, count = cnt, "maximal biclique");
            emit(RawBiclique { tiles: new_r.clone(), members: new_l.clone() })?;

            if !new_p.is_empty() {
                expand(Some(&new_l), new_r, new_p, new_q, cancel, emit, depth + 1)?;
            }
        } else {
            trace!(depth, tile = x.id, "branch dominated by a rejected vertex");
        }

        q.push(x);
    }
    ControlFlow::Continue(())
}
