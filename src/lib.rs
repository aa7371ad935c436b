//! dispatch - geographic matching engine for an in-home-services operation
//!
//! Pairs mobile technicians with fixed-location clients under a hard
//! travel-time budget, with an operator approval workflow on top. The
//! matcher tolerates inaccurate address data, keeps external API usage
//! behind a sampled travel-time cache, and survives partial outages of the
//! geocoding, routing and CRM providers.

pub mod actions;
pub mod addresses;
pub mod areas;
pub mod clients;
pub mod clients_repo;
pub mod commands;
pub mod config;
pub mod crm;
pub mod crm_sync;
pub mod geocodes;
pub mod geocoding;
pub mod instance_lock;
pub mod match_runs;
pub mod match_runs_repo;
pub mod match_service;
pub mod matching;
pub mod overrides;
pub mod overrides_repo;
pub mod pairings;
pub mod pairings_repo;
pub mod proposals;
pub mod proposals_repo;
pub mod routing;
pub mod scheduler;
pub mod scheduling_meta_repo;
pub mod schema;
pub mod simulation;
pub mod sync_runs_repo;
pub mod technicians;
pub mod technicians_repo;
pub mod travel_time;
pub mod travel_time_cache;
pub mod travel_time_repo;
pub mod validation;
pub mod web;

pub use clients::Client;
pub use geocodes::{Geocode, Point};
pub use matching::{MatchEngine, MatchingResult};
pub use technicians::Technician;
pub use travel_time_cache::TravelTimeService;
