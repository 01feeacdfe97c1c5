//! Nearest-neighbor identity matching against the gallery.

use crate::gallery::Gallery;
use crate::types::{BoundingBox, Embedding, MatchResult};
use ndarray::{aview1, Array2, Axis};

/// Match each (embedding, location) pair against the gallery.
///
/// Returns one [`MatchResult`] per pair, in input order. A `None` embedding
/// (the backend failed on that crop) becomes the unknown sentinel without
/// consulting the gallery; an empty gallery makes every face unknown and is
/// logged as its own condition, since the remediation (register identities)
/// differs from an ordinary non-match.
pub fn match_faces(
    embeddings: &[Option<Embedding>],
    locations: &[BoundingBox],
    gallery: &Gallery,
    tolerance: f32,
) -> Vec<MatchResult> {
    debug_assert_eq!(embeddings.len(), locations.len());

    if gallery.is_empty() {
        if !locations.is_empty() {
            tracing::warn!(
                faces = locations.len(),
                "no identities registered; every face will be reported as unknown"
            );
        }
        return locations.iter().map(|loc| MatchResult::unknown(*loc)).collect();
    }

    let matrix = gallery.encoding_matrix();

    embeddings
        .iter()
        .zip(locations.iter())
        .map(|(embedding, location)| match embedding {
            None => MatchResult::unknown(*location),
            Some(query) => match_one(query, &matrix, gallery, tolerance, *location),
        })
        .collect()
}

fn match_one(
    query: &Embedding,
    matrix: &Array2<f32>,
    gallery: &Gallery,
    tolerance: f32,
    location: BoundingBox,
) -> MatchResult {
    if query.len() != matrix.ncols() {
        tracing::error!(
            query_dim = query.len(),
            gallery_dim = matrix.ncols(),
            "embedding dimension mismatch at match time"
        );
        return MatchResult::unknown(location);
    }

    // Distance from the query to every gallery row in one pass.
    let diff = matrix - &aview1(&query.values);
    let distances = diff.map_axis(Axis(1), |row| row.dot(&row).sqrt());

    // Strict `<` keeps the earliest-registered entry on ties.
    let mut best_index = 0usize;
    let mut best_distance = f32::INFINITY;
    for (i, &d) in distances.iter().enumerate() {
        if d < best_distance {
            best_distance = d;
            best_index = i;
        }
    }

    if best_distance <= tolerance {
        let confidence = if tolerance > 0.0 {
            (1.0 - best_distance / tolerance).max(0.0)
        } else {
            1.0
        };
        MatchResult {
            name: gallery.name_at(best_index).to_string(),
            confidence,
            location,
        }
    } else {
        tracing::debug!(
            candidate = gallery.name_at(best_index),
            distance = best_distance,
            tolerance,
            "nearest identity above tolerance; face is unknown"
        );
        MatchResult::unknown(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNKNOWN_NAME;

    fn loc() -> BoundingBox {
        BoundingBox {
            top: 0,
            right: 100,
            bottom: 100,
            left: 0,
        }
    }

    fn gallery_of(entries: &[(&str, Vec<f32>)]) -> Gallery {
        let mut g = Gallery::new();
        for (name, values) in entries {
            g.add(*name, Embedding::new(values.clone())).unwrap();
        }
        g
    }

    #[test]
    fn test_empty_gallery_invariant() {
        let g = Gallery::new();
        let results = match_faces(
            &[Some(Embedding::new(vec![1.0, 2.0]))],
            &[loc()],
            &g,
            0.6,
        );
        assert_eq!(results.len(), 1);
        assert!(results[0].is_unknown());
    }

    #[test]
    fn test_zero_known_faces_one_region() {
        let g = Gallery::new();
        let results = match_faces(&[None], &[loc()], &g, 0.6);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, UNKNOWN_NAME);
    }

    #[test]
    fn test_null_embedding_skips_gallery() {
        let g = gallery_of(&[("alice", vec![1.0, 0.0])]);
        let results = match_faces(&[None], &[loc()], &g, 10.0);
        assert!(results[0].is_unknown());
    }

    #[test]
    fn test_exact_match_full_confidence() {
        // Three identities at mutual distance above tolerance; the query is
        // exactly entry #2's embedding.
        let mut e1 = vec![0.0f32; 128];
        e1[0] = 5.0;
        let mut e2 = vec![0.0f32; 128];
        e2[1] = 5.0;
        let mut e3 = vec![0.0f32; 128];
        e3[2] = 5.0;

        let g = gallery_of(&[
            ("alice", e1),
            ("bob", e2.clone()),
            ("carol", e3),
        ]);
        let results = match_faces(&[Some(Embedding::new(e2))], &[loc()], &g, 0.6);
        assert_eq!(results[0].name, "bob");
        assert!((results[0].confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_boundary_accepted_at_tolerance() {
        // Query at distance exactly 5.0 from the only entry.
        let g = gallery_of(&[("alice", vec![0.0, 0.0])]);
        let query = Embedding::new(vec![3.0, 4.0]);
        let results = match_faces(&[Some(query)], &[loc()], &g, 5.0);
        assert_eq!(results[0].name, "alice");
        assert_eq!(results[0].confidence, 0.0);
        // Accepted: the name is real even though the display score hit zero.
        assert!(!results[0].is_unknown());
    }

    #[test]
    fn test_threshold_boundary_rejected_past_tolerance() {
        let g = gallery_of(&[("alice", vec![0.0, 0.0])]);
        let query = Embedding::new(vec![3.0, 4.0]); // distance 5.0
        let results = match_faces(&[Some(query)], &[loc()], &g, 4.999);
        assert!(results[0].is_unknown());
    }

    #[test]
    fn test_confidence_monotonic_in_distance() {
        let g = gallery_of(&[("alice", vec![0.0, 0.0])]);
        let tolerance = 10.0;
        let mut last = f32::INFINITY;
        for d in [0.0f32, 1.0, 2.5, 5.0, 7.5, 10.0] {
            let query = Embedding::new(vec![d, 0.0]);
            let results = match_faces(&[Some(query)], &[loc()], &g, tolerance);
            assert!(
                results[0].confidence <= last,
                "confidence rose between distances"
            );
            last = results[0].confidence;
        }
    }

    #[test]
    fn test_tie_breaks_to_earliest_entry() {
        let shared = vec![1.0f32, 1.0];
        let g = gallery_of(&[("first", shared.clone()), ("second", shared.clone())]);
        let results = match_faces(&[Some(Embedding::new(shared))], &[loc()], &g, 0.5);
        assert_eq!(results[0].name, "first");
    }

    #[test]
    fn test_nearest_neighbor_wins() {
        let g = gallery_of(&[("far", vec![10.0, 0.0]), ("near", vec![1.0, 0.0])]);
        let results = match_faces(&[Some(Embedding::new(vec![0.0, 0.0]))], &[loc()], &g, 2.0);
        assert_eq!(results[0].name, "near");
    }

    #[test]
    fn test_query_dimension_mismatch_degrades() {
        let g = gallery_of(&[("alice", vec![1.0, 0.0, 0.0])]);
        let results = match_faces(&[Some(Embedding::new(vec![1.0, 0.0]))], &[loc()], &g, 10.0);
        assert!(results[0].is_unknown());
    }

    #[test]
    fn test_results_preserve_input_order() {
        let g = gallery_of(&[("alice", vec![0.0, 0.0])]);
        let a = loc();
        let b = BoundingBox {
            top: 200,
            right: 300,
            bottom: 300,
            left: 200,
        };
        let results = match_faces(
            &[None, Some(Embedding::new(vec![0.0, 0.0]))],
            &[a, b],
            &g,
            1.0,
        );
        assert_eq!(results.len(), 2);
        assert!(results[0].is_unknown());
        assert_eq!(results[0].location, a);
        assert_eq!(results[1].name, "alice");
        assert_eq!(results[1].location, b);
    }
}
