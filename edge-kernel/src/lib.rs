/**
 * EDGE KERNEL - Pont entre la carte capteurs/actionneurs et la persistance
 *
 * Modules :
 * - serial : lien série (codec ligne, canal de commandes, shadow, buffer)
 * - rules : moteur de règles seuil → alerte + action
 * - ports : contrats de persistance, JsonStore, analytics
 * - http / config / health : frontière du processus
 */

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod models;
pub mod ports;
pub mod rules;
pub mod serial;

pub use error::{EdgeError, EdgeResult};
