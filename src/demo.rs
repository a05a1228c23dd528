//! Bundled demo CRUD API — the sample instrumentation target.
//!
//! A tiny in-memory roster of aliens, good for pointing a capture SDK at:
//! its list endpoint returns an array (exercising the order-insensitive
//! matcher) and its mutations shift state between replays (exercising
//! denoise and normalize).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use warp::http::StatusCode;
use warp::Filter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct B10Alien {
    pub id: String,
    pub name: String,
    pub power: i64,
    pub special: String,
}

pub type Roster = Arc<RwLock<Vec<B10Alien>>>;

/// The canonical five-alien roster the demo boots with.
pub fn seed_roster() -> Roster {
    let aliens = vec![
        B10Alien {
            id: "1".to_string(),
            name: "Alien-X".to_string(),
            power: 90000,
            special: "intelligence, power, speed, hax".to_string(),
        },
        B10Alien {
            id: "2".to_string(),
            name: "Swamp-Fire".to_string(),
            power: 2000,
            special: "fire, plant, invulnerabilityxl".to_string(),
        },
        B10Alien {
            id: "3".to_string(),
            name: "Xlr8".to_string(),
            power: 1500,
            special: "speed,mobility".to_string(),
        },
        B10Alien {
            id: "4".to_string(),
            name: "Jet-Ray".to_string(),
            power: 1900,
            special: "flight, speed, lazer".to_string(),
        },
        B10Alien {
            id: "5".to_string(),
            name: "Ben".to_string(),
            power: 50,
            special: "turn into alien, weakest, useless".to_string(),
        },
    ];
    Arc::new(RwLock::new(aliens))
}

fn with_roster(roster: Roster) -> impl Filter<Extract = (Roster,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || roster.clone())
}

pub fn routes(
    roster: Roster,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let home = warp::path::end().and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "instructions": "Add '/b10aliens' to the link",
        }))
    });

    let list = warp::path("b10aliens")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_roster(roster.clone()))
        .and_then(list_aliens);

    let add = warp::path("b10aliens")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<B10Alien>())
        .and(with_roster(roster.clone()))
        .and_then(add_alien);

    let edit = warp::path("b10aliens")
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::put())
        .and(warp::body::json::<B10Alien>())
        .and(with_roster(roster.clone()))
        .and_then(edit_alien);

    let remove = warp::path("b10aliens")
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_roster(roster))
        .and_then(remove_alien);

    home.or(list).or(add).or(edit).or(remove)
}

pub async fn serve(roster: Roster, port: u16) {
    tracing::info!(port, "demo API listening");
    warp::serve(routes(roster)).run(([0, 0, 0, 0], port)).await;
}

async fn list_aliens(roster: Roster) -> Result<impl warp::Reply, warp::Rejection> {
    let aliens = roster.read().await;
    Ok(warp::reply::json(&*aliens))
}

async fn add_alien(
    alien: B10Alien,
    roster: Roster,
) -> Result<impl warp::Reply, warp::Rejection> {
    roster.write().await.push(alien.clone());
    Ok(warp::reply::with_status(warp::reply::json(&alien), StatusCode::CREATED))
}

async fn edit_alien(
    id: String,
    update: B10Alien,
    roster: Roster,
) -> Result<impl warp::Reply, warp::Rejection> {
    let mut aliens = roster.write().await;
    for alien in aliens.iter_mut() {
        if alien.id == id {
            alien.name = update.name.clone();
            alien.power = update.power;
            alien.special = update.special.clone();
            return Ok(warp::reply::with_status(warp::reply::json(&update), StatusCode::OK));
        }
    }
    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({"error": true, "message": "Invalid"})),
        StatusCode::BAD_REQUEST,
    ))
}

async fn remove_alien(
    id: String,
    roster: Roster,
) -> Result<impl warp::Reply, warp::Rejection> {
    let mut aliens = roster.write().await;
    let before = aliens.len();
    aliens.retain(|a| a.id != id);
    if aliens.len() < before {
        Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({"message": "Item Deleted"})),
            StatusCode::OK,
        ))
    } else {
        Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({"error": true, "message": "Invalid"})),
            StatusCode::BAD_REQUEST,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_returns_seeded_roster() {
        let api = routes(seed_roster());
        let res = warp::test::request().method("GET").path("/b10aliens").reply(&api).await;
        assert_eq!(res.status(), StatusCode::OK);
        let aliens: Vec<B10Alien> = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(aliens.len(), 5);
        assert_eq!(aliens[0].name, "Alien-X");
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let api = routes(seed_roster());
        let res = warp::test::request()
            .method("POST")
            .path("/b10aliens")
            .json(&B10Alien {
                id: "6".to_string(),
                name: "Upgrade".to_string(),
                power: 800,
                special: "tech merge".to_string(),
            })
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);

        let res = warp::test::request().method("GET").path("/b10aliens").reply(&api).await;
        let aliens: Vec<B10Alien> = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(aliens.len(), 6);
    }

    #[tokio::test]
    async fn test_edit_unknown_id_is_invalid() {
        let api = routes(seed_roster());
        let res = warp::test::request()
            .method("PUT")
            .path("/b10aliens/99")
            .json(&B10Alien {
                id: "99".to_string(),
                name: "Ghost".to_string(),
                power: 0,
                special: String::new(),
            })
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_remove_alien() {
        let api = routes(seed_roster());
        let res = warp::test::request().method("DELETE").path("/b10aliens/5").reply(&api).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = warp::test::request().method("GET").path("/b10aliens").reply(&api).await;
        let aliens: Vec<B10Alien> = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(aliens.len(), 4);
    }
}
