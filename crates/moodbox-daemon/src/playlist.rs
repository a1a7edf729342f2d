//! Ring-navigable playlist with an independent shuffle view.
//!
//! Two orders are kept side by side: `original` (fixed at construction) and
//! `shuffled` (re-permuted on every shuffle activation). `cursor` indexes
//! whichever one is active and is never left out of range.
//!
//! Toggling shuffle keeps the cursor *numerically*: position 3 in the
//! original order becomes position 3 in the shuffled order, which is usually
//! a different track. This matches the remote's behaviour of "keep going
//! from here in the new order" and is intentional.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::track::{PlaylistId, Track};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Original,
    Shuffled,
}

#[derive(Debug, Clone)]
pub struct Playlist {
    id: PlaylistId,
    name: String,
    original: Vec<Track>,
    shuffled: Vec<Track>,
    view: View,
    cursor: usize,
    announcement: Option<PathBuf>,
}

impl Playlist {
    /// Returns `None` for an empty track list: a playlist always has a
    /// current track.
    pub fn new(id: PlaylistId, name: impl Into<String>, tracks: Vec<Track>) -> Option<Self> {
        if tracks.is_empty() {
            return None;
        }
        Some(Self {
            id,
            name: name.into(),
            shuffled: tracks.clone(),
            original: tracks,
            view: View::Original,
            cursor: 0,
            announcement: None,
        })
    }

    pub fn id(&self) -> PlaylistId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_shuffled(&self) -> bool {
        self.view == View::Shuffled
    }

    /// Tracks in construction order, regardless of shuffle.
    pub fn original_order(&self) -> &[Track] {
        &self.original
    }

    /// Tracks in the order playback walks them right now.
    pub fn active_order(&self) -> &[Track] {
        match self.view {
            View::Original => &self.original,
            View::Shuffled => &self.shuffled,
        }
    }

    pub fn current(&self) -> &Track {
        &self.active_order()[self.cursor]
    }

    /// Move one step with wraparound and return the new current track.
    pub fn advance(&mut self, direction: Direction) -> &Track {
        let len = self.len();
        self.cursor = match direction {
            Direction::Next => (self.cursor + 1) % len,
            Direction::Prev => (self.cursor + len - 1) % len,
        };
        self.current()
    }

    pub fn set_shuffle(&mut self, on: bool) {
        self.set_shuffle_with(on, &mut rand::thread_rng());
    }

    /// Turning shuffle on always draws a fresh permutation, even when it
    /// was already on.
    pub fn set_shuffle_with<R: Rng + ?Sized>(&mut self, on: bool, rng: &mut R) {
        if on {
            self.shuffled.clone_from(&self.original);
            self.shuffled.shuffle(rng);
            self.view = View::Shuffled;
        } else {
            self.view = View::Original;
        }
    }

    pub fn announcement(&self) -> Option<&Path> {
        self.announcement.as_deref()
    }

    pub fn set_announcement(&mut self, clip: PathBuf) {
        self.announcement = Some(clip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackId;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn playlist(len: usize) -> Playlist {
        let tracks = (0..len)
            .map(|i| Track::new(TrackId(i), format!("track-{}", i)))
            .collect();
        Playlist::new(PlaylistId(0), "test", tracks).unwrap()
    }

    fn ids(tracks: &[Track]) -> Vec<usize> {
        tracks.iter().map(|t| t.id().0).collect()
    }

    #[test]
    fn empty_playlist_is_refused() {
        assert!(Playlist::new(PlaylistId(0), "empty", Vec::new()).is_none());
    }

    #[test]
    fn next_wraps_back_to_start() {
        for len in 1..=5 {
            let mut pl = playlist(len);
            let start = pl.current().clone();
            for _ in 0..len {
                pl.advance(Direction::Next);
            }
            assert_eq!(*pl.current(), start, "len {}", len);
        }
    }

    #[test]
    fn prev_wraps_back_to_start() {
        for len in 1..=5 {
            let mut pl = playlist(len);
            let start = pl.current().clone();
            for _ in 0..len {
                pl.advance(Direction::Prev);
            }
            assert_eq!(*pl.current(), start, "len {}", len);
        }
    }

    #[test]
    fn prev_from_first_is_last() {
        let mut pl = playlist(4);
        assert_eq!(pl.advance(Direction::Prev).id(), TrackId(3));
        assert_eq!(pl.advance(Direction::Next).id(), TrackId(0));
    }

    #[test]
    fn shuffle_is_a_permutation_of_the_original() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut pl = playlist(20);
        pl.set_shuffle_with(true, &mut rng);
        assert!(pl.is_shuffled());
        let mut shuffled = ids(pl.active_order());
        shuffled.sort_unstable();
        assert_eq!(shuffled, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_off_restores_original_after_many_cycles() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut pl = playlist(12);
        let before = ids(pl.original_order());
        for _ in 0..25 {
            pl.set_shuffle_with(true, &mut rng);
            pl.advance(Direction::Next);
            pl.set_shuffle_with(false, &mut rng);
            assert_eq!(ids(pl.active_order()), before);
        }
        assert!(!pl.is_shuffled());
    }

    #[test]
    fn each_activation_draws_a_new_permutation() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut pl = playlist(30);
        pl.set_shuffle_with(true, &mut rng);
        let first = ids(pl.active_order());
        pl.set_shuffle_with(false, &mut rng);
        pl.set_shuffle_with(true, &mut rng);
        assert_ne!(ids(pl.active_order()), first);
    }

    #[test]
    fn cursor_is_kept_by_position_not_identity() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut pl = playlist(10);
        pl.advance(Direction::Next);
        pl.advance(Direction::Next);
        pl.set_shuffle_with(true, &mut rng);
        assert_eq!(pl.cursor(), 2);
        assert_eq!(*pl.current(), pl.active_order()[2]);
        pl.set_shuffle_with(false, &mut rng);
        assert_eq!(pl.cursor(), 2);
        assert_eq!(pl.current().id(), TrackId(2));
    }
}
