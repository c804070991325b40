// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Built-in sample datasets.
//!
//! Two small astronomy relations every installation ships with: `planets`
//! (9 rows, Pluto still invited) and `satellites` (177 rows). They back
//! the documentation examples and the integration battery. Mercury and
//! Venus have no satellites, which the anti-join examples rely on.

use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::catalog::{MemoryCatalog, MemoryDataSet};

/// Register `planets` and `satellites`.
pub fn register_sample_data(catalog: &MemoryCatalog) {
    catalog.register("planets", Arc::new(planets()));
    catalog.register("satellites", Arc::new(satellites()));
}

/// The nine classical planets with their headline physical facts.
pub fn planets() -> MemoryDataSet {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("mass", DataType::Float64, false),
        Field::new("diameter", DataType::Int64, false),
        Field::new("gravity", DataType::Float64, false),
        Field::new("rotationPeriod", DataType::Float64, false),
        Field::new("lengthOfDay", DataType::Float64, false),
        Field::new("distanceFromSun", DataType::Float64, false),
        Field::new("orbitalPeriod", DataType::Float64, false),
        Field::new("meanTemperature", DataType::Int64, false),
        Field::new("surfacePressure", DataType::Float64, true),
        Field::new("numberOfMoons", DataType::Int64, false),
    ]));

    #[allow(clippy::type_complexity)]
    let rows: [(i64, &str, f64, i64, f64, f64, f64, f64, f64, i64, Option<f64>, i64); 9] = [
        (1, "Mercury", 0.33, 4879, 3.7, 1407.6, 4222.6, 57.9, 88.0, 167, Some(0.0), 0),
        (2, "Venus", 4.87, 12104, 8.9, -5832.5, 2802.0, 108.2, 224.7, 464, Some(92.0), 0),
        (3, "Earth", 5.97, 12756, 9.8, 23.9, 24.0, 149.6, 365.2, 15, Some(1.0), 1),
        (4, "Mars", 0.642, 6792, 3.7, 24.6, 24.7, 227.9, 687.0, -65, Some(0.01), 2),
        (5, "Jupiter", 1898.0, 142_984, 23.1, 9.9, 9.9, 778.6, 4331.0, -110, None, 67),
        (6, "Saturn", 568.0, 120_536, 9.0, 10.7, 10.7, 1433.5, 10747.0, -140, None, 61),
        (7, "Uranus", 86.8, 51118, 8.7, -17.2, 17.2, 2872.5, 30589.0, -195, None, 27),
        (8, "Neptune", 102.0, 49528, 11.0, 16.1, 16.1, 4495.1, 59800.0, -200, None, 14),
        (9, "Pluto", 0.0146, 2370, 0.7, -153.3, 153.3, 5906.4, 90560.0, -225, Some(0.00001), 5),
    ];

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.1))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.2))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.3))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.4))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.5))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.6))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.7))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.8))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.9))),
            Arc::new(Float64Array::from(
                rows.iter().map(|r| r.10).collect::<Vec<_>>(),
            )),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.11))),
        ],
    )
    .expect("planets batch is well formed");
    MemoryDataSet::new(schema, vec![batch])
}

/// 177 natural satellites: (planetId, name, mean radius in km).
const SATELLITES: &[(i64, &str, f64)] = &[
    (3, "Moon", 1737.4),
    (4, "Phobos", 11.27),
    (4, "Deimos", 6.2),
    (5, "Io", 1821.6),
    (5, "Europa", 1560.8),
    (5, "Ganymede", 2634.1),
    (5, "Callisto", 2410.3),
    (5, "Amalthea", 83.5),
    (5, "Himalia", 85.0),
    (5, "Elara", 43.0),
    (5, "Pasiphae", 30.0),
    (5, "Sinope", 19.0),
    (5, "Lysithea", 18.0),
    (5, "Carme", 23.0),
    (5, "Ananke", 14.0),
    (5, "Leda", 10.0),
    (5, "Thebe", 49.3),
    (5, "Adrastea", 8.2),
    (5, "Metis", 21.5),
    (5, "Callirrhoe", 4.3),
    (5, "Themisto", 4.0),
    (5, "Megaclite", 2.7),
    (5, "Taygete", 2.5),
    (5, "Chaldene", 1.9),
    (5, "Harpalyke", 2.2),
    (5, "Kalyke", 2.6),
    (5, "Iocaste", 2.6),
    (5, "Erinome", 1.6),
    (5, "Isonoe", 1.9),
    (5, "Praxidike", 3.4),
    (5, "Autonoe", 2.0),
    (5, "Thyone", 2.0),
    (5, "Hermippe", 2.0),
    (5, "Aitne", 1.5),
    (5, "Eurydome", 1.5),
    (5, "Euanthe", 1.5),
    (5, "Euporie", 1.0),
    (5, "Orthosie", 1.0),
    (5, "Sponde", 1.0),
    (5, "Kale", 1.0),
    (5, "Pasithee", 1.0),
    (5, "Hegemone", 1.5),
    (5, "Mneme", 1.0),
    (5, "Aoede", 2.0),
    (5, "Thelxinoe", 1.0),
    (5, "Arche", 1.5),
    (5, "Kallichore", 1.0),
    (5, "Helike", 2.0),
    (5, "Carpo", 1.5),
    (5, "Eukelade", 2.0),
    (5, "Cyllene", 1.0),
    (5, "Kore", 1.0),
    (5, "Herse", 1.0),
    (5, "S/2003 J 2", 1.0),
    (5, "S/2003 J 3", 1.0),
    (5, "S/2003 J 4", 1.0),
    (5, "S/2003 J 5", 2.0),
    (5, "S/2003 J 9", 0.5),
    (5, "S/2003 J 10", 1.0),
    (5, "S/2003 J 12", 0.5),
    (5, "S/2003 J 15", 1.0),
    (5, "S/2003 J 16", 1.0),
    (5, "S/2003 J 18", 1.0),
    (5, "S/2003 J 19", 1.0),
    (5, "S/2003 J 23", 1.0),
    (5, "S/2010 J 1", 1.0),
    (5, "S/2010 J 2", 0.5),
    (5, "S/2011 J 1", 0.5),
    (5, "S/2011 J 2", 0.5),
    (5, "S/2016 J 1", 1.0),
    (6, "Mimas", 198.2),
    (6, "Enceladus", 252.1),
    (6, "Tethys", 531.1),
    (6, "Dione", 561.4),
    (6, "Rhea", 763.8),
    (6, "Titan", 2574.7),
    (6, "Hyperion", 135.0),
    (6, "Iapetus", 734.5),
    (6, "Phoebe", 106.5),
    (6, "Janus", 89.5),
    (6, "Epimetheus", 58.1),
    (6, "Helene", 17.6),
    (6, "Telesto", 12.4),
    (6, "Calypso", 10.7),
    (6, "Atlas", 15.1),
    (6, "Prometheus", 43.1),
    (6, "Pandora", 40.7),
    (6, "Pan", 14.1),
    (6, "Ymir", 9.0),
    (6, "Paaliaq", 11.0),
    (6, "Tarvos", 7.5),
    (6, "Ijiraq", 6.0),
    (6, "Suttungr", 3.5),
    (6, "Kiviuq", 8.0),
    (6, "Mundilfari", 3.5),
    (6, "Albiorix", 16.0),
    (6, "Skathi", 4.0),
    (6, "Erriapus", 5.0),
    (6, "Siarnaq", 20.0),
    (6, "Thrymr", 3.5),
    (6, "Narvi", 3.5),
    (6, "Methone", 1.6),
    (6, "Pallene", 2.5),
    (6, "Polydeuces", 1.3),
    (6, "Daphnis", 3.8),
    (6, "Aegir", 3.0),
    (6, "Bebhionn", 3.0),
    (6, "Bergelmir", 3.0),
    (6, "Bestla", 3.5),
    (6, "Farbauti", 2.5),
    (6, "Fenrir", 2.0),
    (6, "Fornjot", 3.0),
    (6, "Hati", 3.0),
    (6, "Hyrrokkin", 4.0),
    (6, "Kari", 3.5),
    (6, "Loge", 3.0),
    (6, "Skoll", 3.0),
    (6, "Surtur", 3.0),
    (6, "Anthe", 0.9),
    (6, "Jarnsaxa", 3.0),
    (6, "Greip", 3.0),
    (6, "Tarqeq", 3.5),
    (6, "Aegaeon", 0.3),
    (6, "S/2004 S 7", 3.0),
    (6, "S/2004 S 12", 2.5),
    (6, "S/2004 S 13", 3.0),
    (6, "S/2004 S 17", 2.0),
    (6, "S/2006 S 1", 3.0),
    (6, "S/2006 S 3", 3.0),
    (6, "S/2007 S 2", 3.0),
    (6, "S/2007 S 3", 2.5),
    (7, "Ariel", 578.9),
    (7, "Umbriel", 584.7),
    (7, "Titania", 788.4),
    (7, "Oberon", 761.4),
    (7, "Miranda", 235.8),
    (7, "Cordelia", 20.1),
    (7, "Ophelia", 21.4),
    (7, "Bianca", 25.7),
    (7, "Cressida", 39.8),
    (7, "Desdemona", 32.0),
    (7, "Juliet", 46.8),
    (7, "Portia", 67.6),
    (7, "Rosalind", 36.0),
    (7, "Belinda", 40.3),
    (7, "Puck", 81.0),
    (7, "Caliban", 36.0),
    (7, "Sycorax", 75.0),
    (7, "Prospero", 25.0),
    (7, "Setebos", 24.0),
    (7, "Stephano", 16.0),
    (7, "Trinculo", 9.0),
    (7, "Francisco", 11.0),
    (7, "Margaret", 10.0),
    (7, "Ferdinand", 10.0),
    (7, "Perdita", 13.0),
    (7, "Mab", 12.0),
    (7, "Cupid", 9.0),
    (8, "Triton", 1353.4),
    (8, "Nereid", 170.0),
    (8, "Naiad", 33.0),
    (8, "Thalassa", 41.0),
    (8, "Despina", 75.0),
    (8, "Galatea", 88.0),
    (8, "Larissa", 97.0),
    (8, "Proteus", 210.0),
    (8, "Halimede", 31.0),
    (8, "Psamathe", 20.0),
    (8, "Sao", 22.0),
    (8, "Laomedeia", 21.0),
    (8, "Neso", 30.0),
    (8, "Hippocamp", 17.0),
    (9, "Charon", 606.0),
    (9, "Nix", 23.0),
    (9, "Hydra", 30.5),
    (9, "Kerberos", 14.0),
    (9, "Styx", 10.0),
];

/// The natural satellites of the solar system, one row per moon.
pub fn satellites() -> MemoryDataSet {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("planetId", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("radius", DataType::Float64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from_iter_values(
                (1..=SATELLITES.len() as i64).collect::<Vec<_>>(),
            )),
            Arc::new(Int64Array::from_iter_values(
                SATELLITES.iter().map(|s| s.0),
            )),
            Arc::new(StringArray::from_iter_values(
                SATELLITES.iter().map(|s| s.1),
            )),
            Arc::new(Float64Array::from_iter_values(
                SATELLITES.iter().map(|s| s.2),
            )),
        ],
    )
    .expect("satellites batch is well formed");
    MemoryDataSet::new(schema, vec![batch])
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Catalog, DataSet};

    use super::*;

    #[test]
    fn planets_has_nine_rows() {
        let planets = planets();
        let batches = planets.read(None).unwrap();
        assert_eq!(batches[0].num_rows(), 9);
        let stats = planets.statistics();
        assert_eq!(stats.lower_bound(0), Some(1));
        assert_eq!(stats.upper_bound(0), Some(9));
        // the gas giants report no surface pressure
        assert_eq!(stats.null_count(10), Some(4));
    }

    #[test]
    fn satellites_has_exactly_177_rows() {
        assert_eq!(SATELLITES.len(), 177);
        let satellites = satellites();
        assert_eq!(satellites.statistics().record_count, 177);
        // Mercury and Venus have no moons
        assert!(SATELLITES.iter().all(|s| s.0 >= 3));
    }

    #[test]
    fn sample_data_registers_under_lowercase_names() {
        let catalog = MemoryCatalog::new();
        register_sample_data(&catalog);
        assert!(catalog.dataset("planets").is_ok());
        assert!(catalog.dataset("Satellites").is_ok());
    }

    #[test]
    fn moon_counts_match_the_planets_table() {
        let counts = [0i64, 0, 1, 2, 67, 61, 27, 14, 5];
        for (planet, expected) in counts.iter().enumerate() {
            let actual = SATELLITES
                .iter()
                .filter(|s| s.0 == planet as i64 + 1)
                .count() as i64;
            assert_eq!(actual, *expected, "planet {}", planet + 1);
        }
    }
}
