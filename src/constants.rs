use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DOMAIN: &str = "digitraffic";
pub const ATTRIBUTION: &str = "Data provided by Fintraffic / digitraffic.fi, license CC 4.0 BY";
/// Value of the `Digitraffic-User` header sent with every request
pub const DIGITRAFFIC_USER: &str = "eemeliru/digitraffic";
pub const DEFAULT_API_BASE: &str = "https://tie.digitraffic.fi";
pub const TRAFFIC_MESSAGES_PATH: &str = "/api/traffic-message/v1/messages";
pub const WEATHERCAM_STATIONS_PATH: &str = "/api/weathercam/v1/stations";

pub const MANUFACTURER: &str = "Fintraffic";
pub const MODEL: &str = "Digitraffic";
pub const DEFAULT_ICON: &str = "mdi:traffic-cone";

/// Category of a traffic message as reported by the `situationType` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SituationType {
    TrafficAnnouncement,
    RoadWork,
    WeightRestriction,
    ExemptedTransport,
}

impl SituationType {
    pub const ALL: [SituationType; 4] = [
        SituationType::TrafficAnnouncement,
        SituationType::RoadWork,
        SituationType::WeightRestriction,
        SituationType::ExemptedTransport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SituationType::TrafficAnnouncement => "TRAFFIC_ANNOUNCEMENT",
            SituationType::RoadWork => "ROAD_WORK",
            SituationType::WeightRestriction => "WEIGHT_RESTRICTION",
            SituationType::ExemptedTransport => "EXEMPTED_TRANSPORT",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SituationType::TrafficAnnouncement => "Traffic announcement",
            SituationType::RoadWork => "Road work",
            SituationType::WeightRestriction => "Weight restriction",
            SituationType::ExemptedTransport => "Exempted transport",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            SituationType::TrafficAnnouncement => "mdi:alert-circle",
            SituationType::RoadWork => "mdi:road-variant",
            SituationType::WeightRestriction => "mdi:weight",
            SituationType::ExemptedTransport => "mdi:truck-cargo-container",
        }
    }
}

impl fmt::Display for SituationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SituationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SituationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown situation type '{s}'"))
    }
}

/// Label for a raw `situationType` value, `Unknown` when unrecognised
pub fn situation_type_label(raw: &str) -> &'static str {
    raw.parse::<SituationType>()
        .map(|t| t.label())
        .unwrap_or("Unknown")
}

/// Icon for a raw `situationType` value
pub fn situation_type_icon(raw: &str) -> &'static str {
    raw.parse::<SituationType>()
        .map(|t| t.icon())
        .unwrap_or(DEFAULT_ICON)
}

/// Returns the canonical spelling of a municipality if it is in the reference list.
/// Comparison is case-insensitive.
pub fn canonical_municipality(name: &str) -> Option<&'static str> {
    let wanted = name.trim().to_lowercase();
    FINNISH_MUNICIPALITIES
        .iter()
        .copied()
        .find(|m| m.to_lowercase() == wanted)
}

/// Reference list of Finnish municipalities used to validate filter selections
pub const FINNISH_MUNICIPALITIES: &[&str] = &[
    "Akaa",
    "Alajärvi",
    "Alavieska",
    "Alavus",
    "Asikkala",
    "Askola",
    "Aura",
    "Brändö",
    "Eckerö",
    "Enonkoski",
    "Enontekiö",
    "Espoo",
    "Eura",
    "Eurajoki",
    "Evijärvi",
    "Finström",
    "Forssa",
    "Föglö",
    "Geta",
    "Haapajärvi",
    "Haapavesi",
    "Hailuoto",
    "Halsua",
    "Hamina",
    "Hammarland",
    "Hankasalmi",
    "Hanko",
    "Harjavalta",
    "Hartola",
    "Hattula",
    "Hausjärvi",
    "Heinola",
    "Heinävesi",
    "Helsinki",
    "Hirvensalmi",
    "Hollola",
    "Huittinen",
    "Humppila",
    "Hyrynsalmi",
    "Hyvinkää",
    "Hämeenkyrö",
    "Hämeenlinna",
    "Ii",
    "Iisalmi",
    "Iitti",
    "Ikaalinen",
    "Ilmajoki",
    "Ilomantsi",
    "Imatra",
    "Inari",
    "Inkoo",
    "Isojoki",
    "Isokyrö",
    "Janakkala",
    "Joensuu",
    "Jokioinen",
    "Jomala",
    "Joroinen",
    "Joutsa",
    "Juuka",
    "Juupajoki",
    "Juva",
    "Jyväskylä",
    "Jämijärvi",
    "Jämsä",
    "Järvenpää",
    "Kaarina",
    "Kaavi",
    "Kajaani",
    "Kalajoki",
    "Kangasala",
    "Kangasniemi",
    "Kankaanpää",
    "Kannonkoski",
    "Kannus",
    "Karijoki",
    "Karkkila",
    "Karstula",
    "Karvia",
    "Kaskinen",
    "Kauhajoki",
    "Kauhava",
    "Kauniainen",
    "Kaustinen",
    "Keitele",
    "Kemi",
    "Kemijärvi",
    "Keminmaa",
    "Kemiönsaari",
    "Kempele",
    "Kerava",
    "Keuruu",
    "Kihniö",
    "Kinnula",
    "Kirkkonummi",
    "Kitee",
    "Kittilä",
    "Kiuruvesi",
    "Kivijärvi",
    "Kokemäki",
    "Kokkola",
    "Kolari",
    "Konnevesi",
    "Kontiolahti",
    "Korsnäs",
    "Koski Tl",
    "Kotka",
    "Kouvola",
    "Kristiinankaupunki",
    "Kruunupyy",
    "Kuhmo",
    "Kuhmoinen",
    "Kumlinge",
    "Kuopio",
    "Kuortane",
    "Kurikka",
    "Kustavi",
    "Kuusamo",
    "Kyyjärvi",
    "Kärkölä",
    "Kärsämäki",
    "Kökar",
    "Lahti",
    "Laihia",
    "Laitila",
    "Lapinjärvi",
    "Lapinlahti",
    "Lappajärvi",
    "Lappeenranta",
    "Lapua",
    "Laukaa",
    "Lemland",
    "Lempäälä",
    "Leppävirta",
    "Lestijärvi",
    "Lieksa",
    "Lieto",
    "Liminka",
    "Liperi",
    "Lohja",
    "Loimaa",
    "Loppi",
    "Loviisa",
    "Luhanka",
    "Lumijoki",
    "Lumparland",
    "Luoto",
    "Luumäki",
    "Maalahti",
    "Maarianhamina",
    "Marttila",
    "Masku",
    "Merijärvi",
    "Merikarvia",
    "Miehikkälä",
    "Mikkeli",
    "Muhos",
    "Multia",
    "Muonio",
    "Mustasaari",
    "Muurame",
    "Mynämäki",
    "Myrskylä",
    "Mäntsälä",
    "Mänttä-Vilppula",
    "Mäntyharju",
    "Naantali",
    "Nakkila",
    "Nivala",
    "Nokia",
    "Nousiainen",
    "Nurmes",
    "Nurmijärvi",
    "Närpiö",
    "Orimattila",
    "Oripää",
    "Orivesi",
    "Oulainen",
    "Oulu",
    "Outokumpu",
    "Padasjoki",
    "Paimio",
    "Paltamo",
    "Parainen",
    "Parikkala",
    "Parkano",
    "Pedersören kunta",
    "Pelkosenniemi",
    "Pello",
    "Perho",
    "Pertunmaa",
    "Petäjävesi",
    "Pieksämäki",
    "Pielavesi",
    "Pietarsaari",
    "Pihtipudas",
    "Pirkkala",
    "Polvijärvi",
    "Pomarkku",
    "Pori",
    "Pornainen",
    "Porvoo",
    "Posio",
    "Pudasjärvi",
    "Pukkila",
    "Punkalaidun",
    "Puolanka",
    "Puumala",
    "Pyhtää",
    "Pyhäjoki",
    "Pyhäjärvi",
    "Pyhäntä",
    "Pyhäranta",
    "Pälkäne",
    "Pöytyä",
    "Raahe",
    "Raasepori",
    "Raisio",
    "Rantasalmi",
    "Ranua",
    "Rauma",
    "Rautalampi",
    "Rautavaara",
    "Rautjärvi",
    "Reisjärvi",
    "Riihimäki",
    "Ristijärvi",
    "Rovaniemi",
    "Ruokolahti",
    "Ruovesi",
    "Rusko",
    "Rääkkylä",
    "Saarijärvi",
    "Salla",
    "Salo",
    "Saltvik",
    "Sastamala",
    "Sauvo",
    "Savitaipale",
    "Savonlinna",
    "Savukoski",
    "Seinäjoki",
    "Sievi",
    "Siikainen",
    "Siikajoki",
    "Siikalatva",
    "Siilinjärvi",
    "Simo",
    "Sipoo",
    "Siuntio",
    "Sodankylä",
    "Soini",
    "Somero",
    "Sonkajärvi",
    "Sotkamo",
    "Sottunga",
    "Sulkava",
    "Sund",
    "Suomussalmi",
    "Suonenjoki",
    "Sysmä",
    "Säkylä",
    "Taipalsaari",
    "Taivalkoski",
    "Taivassalo",
    "Tammela",
    "Tampere",
    "Tervo",
    "Tervola",
    "Teuva",
    "Tohmajärvi",
    "Toholampi",
    "Toivakka",
    "Tornio",
    "Turku",
    "Tuusniemi",
    "Tuusula",
    "Tyrnävä",
    "Ulvila",
    "Urjala",
    "Utajärvi",
    "Utsjoki",
    "Uurainen",
    "Uusikaarlepyy",
    "Uusikaupunki",
    "Vaala",
    "Vaasa",
    "Valkeakoski",
    "Vantaa",
    "Varkaus",
    "Vehmaa",
    "Vesanto",
    "Vesilahti",
    "Veteli",
    "Vieremä",
    "Vihti",
    "Viitasaari",
    "Vimpeli",
    "Virolahti",
    "Virrat",
    "Vårdö",
    "Vöyri",
    "Ylitornio",
    "Ylivieska",
    "Ylöjärvi",
    "Ypäjä",
    "Ähtäri",
    "Äänekoski",
];
