//! Built-in articles used as summarization work for quality probes and peer review.

use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Article {
    pub id: &'static str,
    pub text: &'static str,
}

pub const ARTICLES: &[Article] = &[
    Article {
        id: "tidal-energy",
        text: "Coastal engineers in northern Scotland have completed the first year of operation of a tidal \
energy array anchored to the seabed of the Pentland Firth. The array uses four turbines, each about the size \
of a small bus, that spin as the tide rushes between the islands. Over the year the turbines delivered enough \
electricity to supply roughly four thousand homes, and the operators say output was far more predictable than \
wind or solar because tides follow the moon rather than the weather. Maintenance remains the main concern: \
salt water corrodes moving parts, and divers can only reach the turbines during short slack-water windows. \
The engineers plan to test a new coating on the turbine blades next year and hope that cheaper maintenance \
will make tidal energy competitive with offshore wind before the end of the decade.",
    },
    Article {
        id: "urban-beekeeping",
        text: "A city council survey found that the number of registered beehives on rooftops has tripled over \
five years, driven by restaurants and office buildings that want local honey and a greener image. Ecologists \
warn that the boom may be harming wild pollinators. Honeybees compete with native bees for the same limited \
flowers, and rooftop colonies can spread disease to wild populations. The survey counted more than nine \
hundred hives but found that flowering plants in parks and gardens had barely increased. Researchers suggest \
the council should cap new hives in crowded districts and fund the planting of flowers along streets and \
railway embankments. Beekeepers argue that their colonies raise awareness of pollinators, but most agree \
that more flowers would benefit every kind of bee in the city.",
    },
    Article {
        id: "library-robots",
        text: "The national library has introduced autonomous robots that scan shelves overnight and report \
misplaced books to the morning staff. Each robot carries a camera mast and reads spine labels as it drives \
along the aisles, comparing what it sees with the catalogue. Before the robots arrived, librarians spent \
several hours every week hunting for lost volumes, and some rare books stayed missing for years. In the first \
three months the robots located more than two thousand misplaced books, including a seventeenth century atlas \
that had been shelved in the wrong wing. Staff say the robots have not replaced any jobs; instead librarians \
now spend more time helping readers. The library plans to share the scanning software with regional \
libraries that cannot afford to build their own system.",
    },
];

/// Pick a random built-in article.
pub fn random_article<R: Rng>(rng: &mut R) -> &'static Article {
    ARTICLES.choose(rng).unwrap_or(&ARTICLES[0])
}

pub fn find_article(id: &str) -> Option<&'static Article> {
    ARTICLES.iter().find(|a| a.id == id)
}
