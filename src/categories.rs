use crate::error::GameResult;
use crate::store::Store;
use crate::types::{CategoryId, Player};

/// A prompt category with its fixed pool of prompts
pub struct Category {
    pub id: &'static str,
    pub title: &'static str,
    pub prompts: &'static [&'static str],
}

/// The fixed global category list. Order here is the canonical pool order.
pub const CATEGORIES: &[Category] = &[
    Category {
        id: "headline_hijack",
        title: "Headline Hijack",
        prompts: &[
            "Write tomorrow's most unbelievable news headline",
            "A headline that would make everyone delete their social media",
            "The headline announcing the weirdest world record ever set",
            "A local newspaper headline about your neighborhood",
            "The headline that finally unites the whole planet",
            "A sports headline from a sport that doesn't exist yet",
        ],
    },
    Category {
        id: "movie_pitch",
        title: "Movie Pitch",
        prompts: &[
            "Pitch a sequel nobody asked for in one sentence",
            "The tagline for a horror movie set in a supermarket",
            "A romantic comedy about two rival food trucks, summed up",
            "The worst possible title for an Oscar-winning drama",
            "Pitch a documentary about something in your kitchen",
            "The tagline for a heist movie starring grandparents",
        ],
    },
    Category {
        id: "bad_advice",
        title: "Bad Advice",
        prompts: &[
            "The worst possible advice for a first date",
            "Terrible advice for someone starting a new job",
            "The least helpful thing to say to someone stuck in an elevator",
            "Awful financial advice that sounds almost reasonable",
            "The worst tip for surviving a zombie apocalypse",
            "Unhelpful instructions for assembling flat-pack furniture",
        ],
    },
    Category {
        id: "confessions",
        title: "Confessions",
        prompts: &[
            "A confession from your refrigerator",
            "Something your pet would confess if it could talk",
            "A confession from the office printer",
            "What your houseplants say about you behind your back",
            "A secret your GPS has been keeping from you",
            "What your alarm clock really thinks of you",
        ],
    },
    Category {
        id: "hot_takes",
        title: "Hot Takes",
        prompts: &[
            "An opinion about breakfast that would start an argument",
            "The most controversial pizza topping stance",
            "A take on weekends that would get you uninvited from parties",
            "The boldest possible claim about socks",
            "An unpopular opinion about holidays",
            "A stance on small talk nobody will admit to agreeing with",
        ],
    },
];

/// Look up a category by id
pub fn category(id: &str) -> Option<&'static Category> {
    CATEGORIES.iter().find(|c| c.id == id)
}

/// Compute the set of categories every opted-in connected player agrees on.
///
/// Players with an empty selection have not opted in and are excluded from
/// the computation entirely; with no opted-in players the pool is empty.
/// The result preserves the canonical category order, so it is independent
/// of player iteration order.
pub fn category_intersection<'a, I>(players: I) -> Vec<CategoryId>
where
    I: IntoIterator<Item = &'a Player>,
{
    let selections: Vec<_> = players
        .into_iter()
        .filter(|p| p.connected && !p.categories.is_empty())
        .map(|p| &p.categories)
        .collect();

    if selections.is_empty() {
        return Vec::new();
    }

    CATEGORIES
        .iter()
        .filter(|c| selections.iter().all(|s| s.contains(c.id)))
        .map(|c| c.id.to_string())
        .collect()
}

/// Recompute the room's category pool from current player state and persist it.
///
/// Called whenever player connectivity or category selection changes; the
/// pool is always replaced wholesale, never merged.
pub async fn update_category_pool(store: &dyn Store, code: &str) -> GameResult<Vec<CategoryId>> {
    let players = store.list_players(code).await?;
    let pool = category_intersection(players.iter());
    store.set_category_pool(code, pool.clone()).await?;
    Ok(pool)
}
