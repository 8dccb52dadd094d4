/*!
# Edge DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le développement et les tests du pont edge avec:
- Carte simulée parlant le protocole ligne (sans matériel)
- Store à pannes injectables pour tester la reprise du buffer
- Harness de test assemblant un noyau complet
*/

pub mod device_stub;
pub mod store_stub;
pub mod test_utils;

pub use device_stub::MockDevice;
pub use store_stub::FlakyStore;
pub use test_utils::TestHarness;
