use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cache::LocationCache;
use crate::geocode::GeocodeClient;
use crate::location::{LocationResult, OriginTag};
use crate::post::{Coordinates, Post, PostLocation};

/// SRL argument names carrying a locative role, e.g. `ARGM-LOC`.
static LOCATIVE_ARGUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.*-LOC").expect("locative argument pattern"));

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionStats {
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub cache_hits: usize,
    pub geocode_calls: usize,
    pub by_origin: BTreeMap<OriginTag, usize>,
}

#[derive(Debug, Default)]
struct Tally {
    cache_hits: usize,
    geocode_calls: usize,
}

#[derive(Debug)]
struct Resolution {
    result: LocationResult,
    id_location: Option<i64>,
}

impl Resolution {
    fn direct(coordinates: &Coordinates, origin: OriginTag) -> Self {
        Self {
            result: LocationResult::from_coordinates(coordinates, origin),
            id_location: None,
        }
    }
}

/// Attaches a location to posts by walking the evidence in priority order:
/// the post's own geo fields, its free-text location, SRL locative
/// arguments, and finally the author's profile. The first branch that
/// yields a position wins.
pub struct LocationResolver {
    cache: Arc<dyn LocationCache>,
    geocoder: GeocodeClient,
}

impl LocationResolver {
    pub fn new(cache: Arc<dyn LocationCache>, geocoder: GeocodeClient) -> Self {
        Self { cache, geocoder }
    }

    pub fn geocoder(&self) -> &GeocodeClient {
        &self.geocoder
    }

    pub async fn resolve(&self, post: Post, use_cache: bool) -> Post {
        let mut tally = Tally::default();
        self.resolve_counted(post, use_cache, &mut tally).await.0
    }

    /// Resolves posts one after another. A post that cannot be located never
    /// stops the batch; once `cancel_flag` is raised the remaining posts are
    /// returned untouched and counted as unresolved.
    pub async fn resolve_batch(
        &self,
        posts: Vec<Post>,
        use_cache: bool,
        cancel_flag: Option<Arc<AtomicBool>>,
    ) -> (Vec<Post>, ResolutionStats) {
        let mut stats = ResolutionStats {
            total: posts.len(),
            ..ResolutionStats::default()
        };
        let mut tally = Tally::default();
        let mut output = Vec::with_capacity(posts.len());

        for post in posts {
            let cancelled = cancel_flag
                .as_ref()
                .map(|flag| flag.load(Ordering::SeqCst))
                .unwrap_or(false);
            if cancelled {
                stats.unresolved += 1;
                output.push(post);
                continue;
            }

            let (post, origin) = self.resolve_counted(post, use_cache, &mut tally).await;
            match origin {
                Some(origin) => {
                    stats.resolved += 1;
                    *stats.by_origin.entry(origin).or_default() += 1;
                }
                None => stats.unresolved += 1,
            }
            output.push(post);
        }

        stats.cache_hits = tally.cache_hits;
        stats.geocode_calls = tally.geocode_calls;
        info!(
            target: "location",
            total = stats.total,
            resolved = stats.resolved,
            unresolved = stats.unresolved,
            cache_hits = stats.cache_hits,
            geocode_calls = stats.geocode_calls,
            "location batch finished"
        );
        (output, stats)
    }

    async fn resolve_counted(
        &self,
        mut post: Post,
        use_cache: bool,
        tally: &mut Tally,
    ) -> (Post, Option<OriginTag>) {
        let id_doc = post.id_doc();
        debug!(target: "location", ?id_doc, "resolving post location");

        match self.locate(&post, use_cache, tally).await {
            Some(Resolution {
                result,
                id_location,
            }) => {
                let origin = result.origin;
                debug!(target: "location", ?id_doc, %origin, "post location resolved");
                post.set_location(PostLocation {
                    result,
                    id_location,
                });
                (post, Some(origin))
            }
            None => {
                error!(target: "location", ?id_doc, "location not found for post");
                (post, None)
            }
        }
    }

    async fn locate(&self, post: &Post, use_cache: bool, tally: &mut Tally) -> Option<Resolution> {
        let source = post.source();

        if let Some(geo) = &source.geo {
            return Some(Resolution::direct(geo, OriginTag::Geo));
        }

        if let Some(coordinates) = &source.coordinates {
            return Some(Resolution::direct(coordinates, OriginTag::Coordinates));
        }

        if let Some(text) = non_empty(source.location.as_deref()) {
            if let Some(found) = self
                .resolve_text(text, OriginTag::Location, use_cache, tally)
                .await
            {
                return Some(found);
            }
        }

        for argument in post.arguments() {
            if !LOCATIVE_ARGUMENT.is_match(&argument.argument_name) {
                continue;
            }
            let query = argument.joined_value();
            let Some(query) = non_empty(Some(query.as_str())) else {
                continue;
            };
            info!(
                target: "location",
                argument_name = %argument.argument_name,
                query,
                "locative SRL argument found"
            );
            if let Some(found) = self
                .resolve_text(query, OriginTag::Srl, use_cache, tally)
                .await
            {
                return Some(found);
            }
        }

        let user = source.user.as_ref()?;

        if let Some(geo) = &user.geo {
            return Some(Resolution::direct(geo, OriginTag::UserGeo));
        }

        if let Some(coordinates) = &user.coordinates {
            return Some(Resolution::direct(coordinates, OriginTag::UserCoordinates));
        }

        let text = non_empty(user.location.as_deref())?;
        self.resolve_text(text, OriginTag::UserLocation, use_cache, tally)
            .await
    }

    /// Cache first, then the geocoder. Cache failures are logged and treated
    /// as a miss (on read) or as an uncached result (on write).
    async fn resolve_text(
        &self,
        query: &str,
        origin: OriginTag,
        use_cache: bool,
        tally: &mut Tally,
    ) -> Option<Resolution> {
        if !use_cache {
            tally.geocode_calls += 1;
            let place = self.geocoder.geocode(query).await?;
            return Some(Resolution {
                result: place.into_result(origin),
                id_location: None,
            });
        }

        match self.cache.get(query) {
            Ok(Some(cached)) => {
                tally.cache_hits += 1;
                debug!(target: "location", query, id = cached.id, "location cache hit");
                return Some(Resolution {
                    result: cached.result.with_origin(origin),
                    id_location: None,
                });
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    target: "location_cache",
                    query,
                    ?err,
                    "location cache lookup failed; treating as miss"
                );
            }
        }

        tally.geocode_calls += 1;
        let result = self.geocoder.geocode(query).await?.into_result(origin);
        let id_location = match self.cache.insert(&result, query) {
            Ok(id) => {
                debug!(target: "location_cache", query, id, "new location stored");
                Some(id)
            }
            Err(err) => {
                warn!(target: "location_cache", query, ?err, "failed to store geocoded location");
                None
            }
        };

        Some(Resolution {
            result,
            id_location,
        })
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|value| !value.is_empty())
}
